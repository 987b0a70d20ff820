//! Status panels pushed to `/ws` subscribers.
//!
//! A panel is the chat-message view of a session: a title, a description, a color and the
//! buttons that are currently live. Button ids are [`ActionId`]s, so a client only has to echo
//! the id back to `POST /interactions`.

use meltdown_execution::{PhaseConfig, PresentError, Presenter};
use meltdown_types::meltdown::{
    ActionId, ActionKind, CancelCause, GameSession, MarketMove, Payout, Phase, RoundReport,
    SessionId, Termination, WITHDRAW_MIN_ROUND,
};
use serde::Serialize;
use std::fmt::Write;
use tokio::sync::broadcast;
use tracing::debug;

const PURPLE: u32 = 0x80_00_80;
const RED: u32 = 0xff_00_00;
const LIGHT_RED: u32 = 0xff_44_44;
const GREEN: u32 = 0x00_ff_00;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Success,
    Danger,
    Secondary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Button {
    pub custom_id: String,
    pub label: &'static str,
    pub style: ButtonStyle,
}

impl Button {
    fn new(kind: ActionKind, session: SessionId) -> Self {
        let (label, style) = match kind {
            ActionKind::Join => ("Join", ButtonStyle::Primary),
            ActionKind::Invest => ("Invest", ButtonStyle::Primary),
            ActionKind::Pump => ("PUMP", ButtonStyle::Success),
            ActionKind::Dump => ("DUMP", ButtonStyle::Danger),
            ActionKind::Withdraw => ("WITHDRAW", ButtonStyle::Secondary),
        };
        Self {
            custom_id: ActionId::new(kind, session).to_string(),
            label,
            style,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Panel {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub buttons: Vec<Button>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Phase {
        session: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        phase: Phase,
        round: u32,
        panel: Panel,
    },
    Round {
        session: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        report: RoundReport,
        panel: Panel,
    },
    Terminated {
        session: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        termination: Termination,
        panel: Panel,
    },
}

/// `1234567` -> `` `1,234,567` `$MINT` ``
pub fn format_tokens(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("`{grouped}` `$MINT`")
}

fn seconds(ms: u64) -> u64 {
    ms / 1_000
}

fn mention(payout: &Payout) -> String {
    format!("• <@{}> - {}", payout.participant, format_tokens(payout.amount))
}

pub fn phase_panel(session: &GameSession, config: &PhaseConfig) -> Panel {
    match session.phase {
        Phase::Registration => Panel {
            title: "Market Meltdown".to_string(),
            description: format!(
                "⛏️ REGISTRATION PHASE!\n\
                 💎 You have {} seconds to join the game!\n\n\
                 🏆 Prize Pool: {}\n\
                 💰 Pot will be shared equally among all participants!\n\
                 💎 Current share: {}\n\
                 **Players**: {}",
                seconds(config.registration_ms),
                format_tokens(session.pot),
                format_tokens(session.projected_share()),
                session.players.len(),
            ),
            color: PURPLE,
            buttons: vec![Button::new(ActionKind::Join, session.id)],
        },
        Phase::Investment => Panel {
            title: "Market Meltdown".to_string(),
            description: format!(
                "💰 INVESTMENT PHASE\n\
                 📈 Market is now open!\n\n\
                 💎 Click INVEST to invest your {} from the pot.\n\
                 ⏰ You have {} seconds!\n\
                 **Players Invested**: {}",
                format_tokens(session.share),
                seconds(config.investment_ms),
                session.invested_count(),
            ),
            color: PURPLE,
            buttons: vec![Button::new(ActionKind::Invest, session.id)],
        },
        Phase::Voting => voting_panel(session, config),
        Phase::Terminal => Panel {
            title: "Market Meltdown".to_string(),
            description: "This game has ended!".to_string(),
            color: RED,
            buttons: Vec::new(),
        },
    }
}

fn voting_panel(session: &GameSession, config: &PhaseConfig) -> Panel {
    let withdraw_open = session.round >= WITHDRAW_MIN_ROUND;
    let mut description = format!(
        "📊 MARKET MELTDOWN ROUND {round}\n\
         The market is volatile! You have {secs} seconds to make your trading decision\n\n\
         🚀 **Pump**\n\
         Believe in the market! Double the token pool if majority pumps\n\n\
         📉 **Dump**\n\
         Take 10% from the pool and exit (Market crashes if >50% dump)",
        round = session.round,
        secs = seconds(config.round_ms),
    );
    if withdraw_open {
        let _ = write!(
            description,
            "\n\n🏦 **Withdraw**\nCash out your investment at {:.2}x and exit",
            session.multiplier
        );
    }
    let _ = write!(
        description,
        "\n\n💰 **Market Pool**\n{}\n**Active Traders**: {}",
        format_tokens(session.pool),
        session.active_count()
    );

    let mut buttons = vec![
        Button::new(ActionKind::Pump, session.id),
        Button::new(ActionKind::Dump, session.id),
    ];
    if withdraw_open {
        buttons.push(Button::new(ActionKind::Withdraw, session.id));
    }
    Panel {
        title: format!("Market Meltdown Round {}", session.round),
        description,
        color: PURPLE,
        buttons,
    }
}

pub fn round_panel(report: &RoundReport) -> Panel {
    let mut description = format!(
        "**ROUND {}** Voting machine go \"BRRRRR\" and the results are in!\n\n\
         🚀 Pump: `{}` players\n\
         📉 Dump: `{}` players",
        report.round, report.tally.pump, report.tally.dump,
    );
    if report.round >= WITHDRAW_MIN_ROUND {
        let _ = write!(description, "\n🏦 Withdraw: `{}` players", report.tally.withdraw);
    }
    if !report.dumped.is_empty() {
        description.push_str(
            "\n\n\"It appears there are some jeets in the market\"\n\
             The following players have each successfully dumped but are now out of the game:",
        );
        for payout in &report.dumped {
            let _ = write!(description, "\n{}", mention(payout));
        }
    }
    if !report.withdrawn.is_empty() {
        description.push_str("\n\nThe following players withdrew from the market:");
        for payout in &report.withdrawn {
            let _ = write!(description, "\n{}", mention(payout));
        }
    }
    let market = match report.market {
        MarketMove::Pumped => "📈 Pumpers won! The pool doubled",
        MarketMove::Slumped => "📉 The market slumped",
    };
    let _ = write!(
        description,
        "\n\n{market}\n💰 Market Pool: {}\n✖️ Multiplier: {:.2}x",
        format_tokens(report.pool),
        report.multiplier,
    );

    Panel {
        title: format!("Market Meltdown Round {}", report.round),
        description,
        color: if report.dumped.is_empty() {
            PURPLE
        } else {
            LIGHT_RED
        },
        buttons: Vec::new(),
    }
}

pub fn termination_panel(session: &GameSession, termination: Termination) -> Panel {
    let (description, color) = match termination {
        Termination::Cancelled(CancelCause::NoParticipants) => (
            "⏰ REGISTRATION PHASE ENDED!\n🎉 0 players joined!\n💰 Game cancelled: No players."
                .to_string(),
            RED,
        ),
        Termination::Cancelled(CancelCause::PotTooSmall) => (
            format!(
                "⏰ REGISTRATION PHASE ENDED!\n🎉 {} players joined!\n\
                 💰 Game cancelled: a pot of {} cannot be shared among them.",
                session.players.len(),
                format_tokens(session.pot),
            ),
            RED,
        ),
        Termination::Cancelled(CancelCause::NoInvestments) => (
            format!(
                "📈 CRYPTO MARKET OPENED!\n🏦 0 traders have invested in the market!\n\
                 💰 Market pool: {}\n\nGame cancelled: No investments.",
                format_tokens(0),
            ),
            RED,
        ),
        Termination::Cancelled(CancelCause::Fault) => (
            "⚠️ Game cancelled: the market hit an unexpected error.".to_string(),
            RED,
        ),
        Termination::Crashed => (
            format!(
                "💥 **MARKET CRASHED!**\n\n\
                 Game Over! Market crashed at {:.2}x multiplier!\n\
                 Players who didn't withdraw lost their investment.",
                session.multiplier,
            ),
            RED,
        ),
        Termination::Completed => (
            "🎉 **GAME COMPLETED!**\n\nAll players successfully withdrew their investments!"
                .to_string(),
            GREEN,
        ),
    };
    Panel {
        title: "Market Meltdown".to_string(),
        description,
        color,
        buttons: Vec::new(),
    }
}

/// Publishes panels on a broadcast channel shared by every `/ws` connection.
#[derive(Clone)]
pub struct BroadcastPresenter {
    sender: broadcast::Sender<OutboundEvent>,
    config: PhaseConfig,
}

impl BroadcastPresenter {
    pub fn new(sender: broadcast::Sender<OutboundEvent>, config: PhaseConfig) -> Self {
        Self { sender, config }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: OutboundEvent) -> Result<(), PresentError> {
        // Nobody listening is not a delivery failure.
        if self.sender.send(event).is_err() {
            debug!("no status subscribers");
        }
        Ok(())
    }
}

impl Presenter for BroadcastPresenter {
    async fn render_phase_update(&self, session: &GameSession) -> Result<(), PresentError> {
        self.publish(OutboundEvent::Phase {
            session: session.id,
            channel: session.channel.clone(),
            phase: session.phase,
            round: session.round,
            panel: phase_panel(session, &self.config),
        })
    }

    async fn render_round_outcome(
        &self,
        session: &GameSession,
        report: &RoundReport,
    ) -> Result<(), PresentError> {
        self.publish(OutboundEvent::Round {
            session: session.id,
            channel: session.channel.clone(),
            report: report.clone(),
            panel: round_panel(report),
        })
    }

    async fn render_termination(
        &self,
        session: &GameSession,
        termination: Termination,
    ) -> Result<(), PresentError> {
        self.publish(OutboundEvent::Terminated {
            session: session.id,
            channel: session.channel.clone(),
            termination,
            panel: termination_panel(session, termination),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meltdown_types::meltdown::{Participant, ParticipantId, PayoutKind, Tally};

    fn session(phase: Phase, round: u32) -> GameSession {
        let mut session = GameSession::new(SessionId(77), 1_000).unwrap();
        session.phase = phase;
        session.round = round;
        session
    }

    fn ids(panel: &Panel) -> Vec<&str> {
        panel
            .buttons
            .iter()
            .map(|button| button.custom_id.as_str())
            .collect()
    }

    #[test]
    fn formats_tokens_with_grouping() {
        assert_eq!(format_tokens(0), "`0` `$MINT`");
        assert_eq!(format_tokens(999), "`999` `$MINT`");
        assert_eq!(format_tokens(1_000), "`1,000` `$MINT`");
        assert_eq!(format_tokens(1_234_567), "`1,234,567` `$MINT`");
    }

    #[test]
    fn registration_panel_offers_join() {
        let mut session = session(Phase::Registration, 0);
        session.players.push(Participant::new(ParticipantId(1)));
        let panel = phase_panel(&session, &PhaseConfig::default());
        assert_eq!(ids(&panel), vec!["meltdown_join_77"]);
        assert!(panel.description.contains("30 seconds"));
        assert!(panel.description.contains("`1,000` `$MINT`"));
        assert!(panel.description.contains("**Players**: 1"));
        assert!(panel.description.contains("Current share: `1,000` `$MINT`"));

        session.players.push(Participant::new(ParticipantId(2)));
        session.players.push(Participant::new(ParticipantId(3)));
        let panel = phase_panel(&session, &PhaseConfig::default());
        assert!(panel.description.contains("Current share: `333` `$MINT`"));
    }

    #[test]
    fn withdraw_button_appears_from_round_two() {
        let config = PhaseConfig::default();
        let first = phase_panel(&session(Phase::Voting, 1), &config);
        assert_eq!(ids(&first), vec!["meltdown_pump_77", "meltdown_dump_77"]);
        assert!(!first.description.contains("Withdraw"));

        let second = phase_panel(&session(Phase::Voting, 2), &config);
        assert_eq!(
            ids(&second),
            vec!["meltdown_pump_77", "meltdown_dump_77", "meltdown_withdraw_77"]
        );
        assert_eq!(second.title, "Market Meltdown Round 2");
    }

    #[test]
    fn round_panel_lists_exits() {
        let report = RoundReport {
            round: 2,
            tally: Tally {
                pump: 0,
                dump: 1,
                withdraw: 1,
            },
            dumped: vec![Payout {
                participant: ParticipantId(1),
                kind: PayoutKind::Dump,
                amount: 20,
                experience: 2,
            }],
            withdrawn: vec![Payout {
                participant: ParticipantId(2),
                kind: PayoutKind::Withdraw,
                amount: 75,
                experience: 7,
            }],
            market: MarketMove::Slumped,
            crash_chance: 0.8,
            pool: 180,
            multiplier: 1.3,
        };
        let panel = round_panel(&report);
        assert!(panel.description.contains("🏦 Withdraw: `1` players"));
        assert!(panel.description.contains("• <@1> - `20` `$MINT`"));
        assert!(panel.description.contains("• <@2> - `75` `$MINT`"));
        assert!(panel.description.contains("1.30x"));
        assert_eq!(panel.color, LIGHT_RED);
        assert!(panel.buttons.is_empty());
    }

    #[test]
    fn termination_panels() {
        let mut crashed = session(Phase::Terminal, 3);
        crashed.multiplier = 1.75;
        let panel = termination_panel(&crashed, Termination::Crashed);
        assert!(panel.description.contains("crashed at 1.75x"));
        assert_eq!(panel.color, RED);

        let panel = termination_panel(&crashed, Termination::Completed);
        assert_eq!(panel.color, GREEN);

        let panel = termination_panel(
            &crashed,
            Termination::Cancelled(CancelCause::NoParticipants),
        );
        assert!(panel.description.contains("No players"));
    }

    #[tokio::test]
    async fn publishes_to_subscribers() {
        let (sender, _) = broadcast::channel(8);
        let presenter = BroadcastPresenter::new(sender, PhaseConfig::default());
        let session = session(Phase::Registration, 0).with_channel(Some("lobby".to_string()));

        // No subscribers yet: still fine.
        presenter.render_phase_update(&session).await.unwrap();

        let mut events = presenter.subscribe();
        presenter
            .render_termination(&session, Termination::Cancelled(CancelCause::NoParticipants))
            .await
            .unwrap();
        let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "terminated");
        assert_eq!(event["session"], 77);
        assert_eq!(event["channel"], "lobby");
        assert_eq!(event["termination"]["reason"], "cancelled");
        assert_eq!(event["termination"]["cause"], "no_participants");
    }
}
