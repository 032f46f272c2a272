//! Message drafts posted into ticket channels, DMs and the archive log.

use desk_platform::{
    colors, role_mention, user_mention, Button, ButtonRow, ButtonStyle, Embed, EmbedField,
    MessageDraft, Tone,
};
use desk_types::{StatusNotice, Ticket, TicketCategory};

use crate::actions::{
    review_control_id, Actor, CLAIM_TICKET, CLOSE_TICKET, DELETE_TICKET, REOPEN_TICKET,
    SAVE_TICKET,
};
use crate::config::{DeskConfig, PING_PLACEHOLDER};

pub(super) const CUSTOMER_MISSING_FOOTER: &str = "The member who opened the ticket was not found in the server, I've re-opened the ticket anyway.";

pub(super) fn initial_controls() -> ButtonRow {
    ButtonRow::new(vec![
        Button::action("Close", ButtonStyle::Secondary, CLOSE_TICKET),
        Button::action("Claim", ButtonStyle::Secondary, CLAIM_TICKET),
    ])
}

pub(super) fn restore_initial_controls() -> MessageDraft {
    MessageDraft {
        components: Some(vec![initial_controls()]),
        ..MessageDraft::default()
    }
}

pub(super) fn initial_message(
    config: &DeskConfig,
    category: TicketCategory,
    requester: &Actor,
    description: &str,
) -> MessageDraft {
    let mention = user_mention(&requester.id);
    let welcome = config
        .welcome_message(category)
        .replace(PING_PLACEHOLDER, &mention);
    let mut embed = Embed::themed(
        Tone::Success,
        "",
        &format!("{welcome}\n\n**You said:**\n{description}"),
    )
    .footer(requester.username.clone())
    .timestamp(chrono::Utc::now());
    embed.color = Some(colors::TICKET_OPENED);

    let content = match config.support_ping_role_id.as_deref() {
        Some(role_id) => format!("{mention} {}", role_mention(role_id)),
        None => mention,
    };
    MessageDraft::embed(embed)
        .content(content)
        .buttons(initial_controls())
}

fn closing_controls(delete_enabled: bool) -> ButtonRow {
    ButtonRow::new(vec![
        Button::action("Reopen", ButtonStyle::Secondary, REOPEN_TICKET),
        Button::action("Save Transcript", ButtonStyle::Secondary, SAVE_TICKET),
        Button::action("Delete", ButtonStyle::Danger, DELETE_TICKET).disabled(!delete_enabled),
    ])
}

pub(super) fn status_message(notice: &StatusNotice, customer_missing: bool) -> MessageDraft {
    match notice {
        StatusNotice::Claimed { staff_id } => MessageDraft::embed(Embed::themed(
            Tone::Success,
            "Ticket Claimed",
            &format!("{} has claimed the ticket.", user_mention(staff_id)),
        )),
        StatusNotice::Unclaimed { staff_id } => MessageDraft::embed(Embed::themed(
            Tone::Failure,
            "Ticket Unclaimed",
            &format!("{} has unclaimed the ticket.", user_mention(staff_id)),
        )),
        StatusNotice::Closed => MessageDraft::embed(Embed::themed(
            Tone::Success,
            "Ticket Closed",
            "The ticket has been closed.",
        ))
        .buttons(closing_controls(false)),
        StatusNotice::Reopened => {
            let embed = Embed::themed(
                Tone::Success,
                "Ticket Reopened",
                "The ticket has been reopened.",
            );
            if customer_missing {
                MessageDraft::embed(embed.footer(CUSTOMER_MISSING_FOOTER))
            } else {
                MessageDraft::embed(embed)
            }
        }
    }
}

/// Closing message once a transcript exists: Delete becomes available.
pub(super) fn closed_with_transcript(transcript_url: &str) -> MessageDraft {
    MessageDraft::embed(Embed::themed(
        Tone::Success,
        "Ticket Closed",
        &format!("The ticket has been closed.\n\n[View Transcript]({transcript_url})"),
    ))
    .buttons(closing_controls(true))
}

pub(super) fn closure_notice(ticket: &Ticket, transcript_url: &str) -> MessageDraft {
    MessageDraft::embed(
        Embed::themed(
            Tone::Neutral,
            "Ticket Closed",
            &format!(
                "Your {} ticket #{} has been closed. You can read the full conversation at any time.",
                ticket.category.readable_name(),
                ticket.display_number()
            ),
        )
        .timestamp(chrono::Utc::now()),
    )
    .buttons(ButtonRow::new(vec![Button::link(
        "View Transcript",
        transcript_url,
    )]))
}

pub(super) fn review_prompt(ticket: &Ticket, staff_id: &str) -> MessageDraft {
    MessageDraft::embed(Embed::themed(
        Tone::Neutral,
        "How did we do?",
        &format!(
            "{} helped you with ticket #{}. We would love to hear how it went.",
            user_mention(staff_id),
            ticket.display_number()
        ),
    ))
    .buttons(ButtonRow::new(vec![Button::action(
        "Review Ticket",
        ButtonStyle::Primary,
        review_control_id(ticket.id),
    )]))
}

/// Appends the review to the first embed of an archive log entry.
pub(super) fn with_review_field(mut embeds: Vec<Embed>, rating: u8, review: &str) -> Vec<Embed> {
    let review = if review.is_empty() {
        "No comment provided"
    } else {
        review
    };
    if let Some(first) = embeds.first_mut() {
        first.fields.push(EmbedField {
            name: "Review".to_string(),
            value: format!("Rating: {rating}\nReview: {review}"),
            inline: false,
        });
    }
    embeds
}

#[cfg(test)]
mod tests {
    use super::{
        closed_with_transcript, initial_message, status_message, with_review_field,
        CUSTOMER_MISSING_FOOTER,
    };
    use crate::actions::Actor;
    use crate::config::DeskConfig;
    use desk_platform::{colors, Embed, Tone};
    use desk_types::{StatusNotice, TicketCategory};

    #[test]
    fn initial_message_mentions_requester_and_ping_role() {
        let config = DeskConfig {
            support_ping_role_id: Some("support".to_string()),
            ..DeskConfig::default()
        };
        let requester = Actor {
            id: "cust-1".to_string(),
            username: "ada".to_string(),
            role_ids: Vec::new(),
        };
        let draft = initial_message(&config, TicketCategory::GameIssues, &requester, "it crashes");
        assert_eq!(draft.content.as_deref(), Some("<@cust-1> <@&support>"));
        let embed = &draft.embeds[0];
        assert_eq!(embed.color, Some(colors::TICKET_OPENED));
        let description = embed.description.as_deref().unwrap_or_default();
        assert!(description.contains("Hello <@cust-1>"));
        assert!(description.ends_with("**You said:**\nit crashes"));
        let controls = draft.components.expect("controls");
        assert_eq!(controls[0].buttons[0].control_id(), Some("close-ticket"));
        assert_eq!(controls[0].buttons[1].control_id(), Some("claim-ticket"));
    }

    #[test]
    fn closing_message_enables_delete_only_with_transcript() {
        let closing = status_message(&StatusNotice::Closed, false);
        let rows = closing.components.expect("controls");
        assert!(rows[0].buttons[2].disabled);

        let saved = closed_with_transcript("https://t.example/abc");
        let rows = saved.components.expect("controls");
        assert!(!rows[0].buttons[2].disabled);
        assert!(saved.embeds[0]
            .description
            .as_deref()
            .unwrap_or_default()
            .contains("[View Transcript](https://t.example/abc)"));
    }

    #[test]
    fn reopened_message_notes_missing_customer() {
        let draft = status_message(&StatusNotice::Reopened, true);
        assert_eq!(
            draft.embeds[0].footer.as_ref().map(|footer| footer.text.as_str()),
            Some(CUSTOMER_MISSING_FOOTER)
        );
        assert!(status_message(&StatusNotice::Reopened, false).embeds[0]
            .footer
            .is_none());
    }

    #[test]
    fn review_field_lands_on_first_embed() {
        let embeds = vec![
            Embed::themed(Tone::Success, "New Transcript Saved", "saved"),
            Embed::themed(Tone::Neutral, "extra", "untouched"),
        ];
        let updated = with_review_field(embeds, 4, "quick and friendly");
        assert_eq!(updated[0].fields[0].name, "Review");
        assert_eq!(
            updated[0].fields[0].value,
            "Rating: 4\nReview: quick and friendly"
        );
        assert!(updated[1].fields.is_empty());
    }
}
