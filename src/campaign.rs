//! The auto-send campaign: a cursor over the contact list that the UI drives
//! with timers. This module only decides what happens next; the window owns
//! the timers and performs the sends.

use rand::Rng;
use thiserror::Error;

use crate::contacts::{Contact, ContactStore, SendOutcome};

pub const FALLBACK_INTERVAL: (u64, u64) = (20, 45);
pub const FAILURE_INTERVAL_SECS: u64 = 1;
/// Pause between selecting a contact and sending to it.
pub const SELECT_DELAY_MS: u64 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum CampaignError {
    #[error("Select a profile and connect to WhatsApp first.")]
    Disconnected,
    #[error("Load a contact list first.")]
    NoContacts,
    #[error("Load the message templates first.")]
    NoTemplates,
    #[error("Select a contact in the list to start sending from.")]
    NoSelection,
    #[error("The selected contact could not be found in the list.")]
    SelectionNotFound,
}

/// What the operator had when pressing START.
pub struct StartCheck<'a> {
    pub connected: bool,
    pub store: &'a ContactStore,
    pub has_templates: bool,
    pub selected: Option<&'a str>,
}

/// Chosen delay before the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalChoice {
    pub secs: u64,
    /// The operator's bounds were unusable and the fallback range was used.
    pub fell_back: bool,
}

/// Uniform whole seconds in `[min, max]`; `min <= 0`, `max < min` or
/// non-numeric input fall back to the default range.
pub fn pick_interval<R: Rng + ?Sized>(min: &str, max: &str, rng: &mut R) -> IntervalChoice {
    let parsed = min.trim().parse::<i64>().ok().zip(max.trim().parse::<i64>().ok());
    match parsed {
        Some((lo, hi)) if lo > 0 && hi >= lo => IntervalChoice {
            secs: rng.gen_range(lo as u64..=hi as u64),
            fell_back: false,
        },
        _ => IntervalChoice {
            secs: rng.gen_range(FALLBACK_INTERVAL.0..=FALLBACK_INTERVAL.1),
            fell_back: true,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Select this contact, then send after `SELECT_DELAY_MS`.
    Send { n: String },
    /// Every contact has been processed.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterSend {
    /// Count down on `next` for `secs`, then take the next step.
    Wait { next: String, secs: u64 },
    Finished,
}

#[derive(Debug, Default)]
pub struct Campaign {
    running: bool,
    // Bumped on every start; replies carry the run they were sent under.
    run: u64,
    cursor: usize,
    last_sent: Option<String>,
}

impl Campaign {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn run_id(&self) -> u64 {
        self.run
    }

    /// True while `run` is the campaign that is still going.
    pub fn is_current(&self, run: u64) -> bool {
        self.running && self.run == run
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    pub fn set_last_sent(&mut self, n: Option<String>) {
        self.last_sent = n;
    }

    /// Validates the preconditions in the order the operator is told about
    /// them and positions the cursor on the selected contact.
    pub fn start(&mut self, check: StartCheck<'_>) -> Result<(), CampaignError> {
        if !check.connected {
            return Err(CampaignError::Disconnected);
        }
        if check.store.is_empty() {
            return Err(CampaignError::NoContacts);
        }
        if !check.has_templates {
            return Err(CampaignError::NoTemplates);
        }
        let selected = check.selected.ok_or(CampaignError::NoSelection)?;
        let start = check.store.position(selected).ok_or(CampaignError::SelectionNotFound)?;
        self.cursor = start;
        self.running = true;
        self.run += 1;
        log::info!("campaign started at contact {selected} ({} in list)", check.store.len());
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.running {
            log::info!("campaign stopped at position {}", self.cursor);
        }
        self.running = false;
    }

    /// Next thing to do. A stopped campaign or an exhausted list finishes.
    pub fn next_step(&self, contacts: &[Contact]) -> Step {
        if !self.running {
            return Step::Finished;
        }
        match contacts.get(self.cursor) {
            Some(c) => Step::Send { n: c.n.clone() },
            None => Step::Finished,
        }
    }

    /// Records a send for the contact under the cursor and advances.
    /// `interval` is consulted only after a success. A reply from an earlier
    /// run leaves the current one untouched.
    pub fn record(
        &mut self,
        run: u64,
        contacts: &[Contact],
        n: &str,
        outcome: SendOutcome,
        interval: impl FnOnce() -> u64,
    ) -> AfterSend {
        if run != self.run {
            log::debug!("ignoring reply for {n} from campaign run {run}");
            return AfterSend::Finished;
        }
        self.last_sent = Some(n.to_string());
        self.cursor += 1;
        if !self.running {
            return AfterSend::Finished;
        }
        match contacts.get(self.cursor) {
            Some(next) => {
                let secs = match outcome {
                    SendOutcome::Success => interval(),
                    SendOutcome::Failed => FAILURE_INTERVAL_SECS,
                };
                AfterSend::Wait { next: next.n.clone(), secs }
            }
            None => AfterSend::Finished,
        }
    }
}

/// Per-second label shown on the contact waiting to be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub n: String,
    pub remaining: u64,
}

impl Countdown {
    pub fn new(n: impl Into<String>, secs: u64) -> Self {
        Self { n: n.into(), remaining: secs }
    }

    pub fn label(&self) -> String {
        if self.remaining > 0 {
            format!("In {}s...", self.remaining)
        } else {
            "Sending...".to_string()
        }
    }

    /// Counts one second down. Returns false once the label reads "Sending...".
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining > 0
    }
}

/// Summary written when a campaign reaches the end of the list.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub generated_at: String,
    pub succeeded: Vec<Contact>,
    pub failed: Vec<Contact>,
}

impl SendReport {
    /// `None` when no contact has an outcome yet.
    pub fn from_contacts(contacts: &[Contact], generated_at: impl Into<String>) -> Option<Self> {
        let pick = |o: SendOutcome| -> Vec<Contact> {
            contacts.iter().filter(|c| c.outcome == Some(o)).cloned().collect()
        };
        let report = Self {
            generated_at: generated_at.into(),
            succeeded: pick(SendOutcome::Success),
            failed: pick(SendOutcome::Failed),
        };
        if report.attempted() == 0 { None } else { Some(report) }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn default_file_name() -> String {
        format!("Report_{}.txt", crate::utils::timestamp_now("%Y%m%d_%H%M"))
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(50);
        let mut lines = vec![
            format!("Send report - {}", self.generated_at),
            rule.clone(),
            "Summary:".to_string(),
            format!("  - Attempted: {}", self.attempted()),
            format!("  - Successes: {}", self.succeeded.len()),
            format!("  - Failures: {}", self.failed.len()),
            format!("\n{}\n", rule),
        ];
        let mut section = |title: &str, contacts: &[Contact]| {
            if contacts.is_empty() {
                return;
            }
            lines.push(title.to_string());
            lines.extend(
                contacts
                    .iter()
                    .map(|c| format!("  - [{}] {} - {}", c.n, c.name, c.phone_display)),
            );
            lines.push("\n".to_string());
        };
        section("SUCCESSFUL SENDS:", &self.succeeded);
        section("FAILED SENDS:", &self.failed);
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::tests::scratch_csv;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const LIST: &str = "nome,x,telefone,status\nAna,,11911110000,\nBeto,,11922220000,\nCaio,,11933330000,\n";

    fn store(tag: &str) -> ContactStore {
        ContactStore::load(&scratch_csv(&format!("campaign-{}", tag), LIST)).unwrap()
    }

    fn check<'a>(store: &'a ContactStore, selected: Option<&'a str>) -> StartCheck<'a> {
        StartCheck { connected: true, store, has_templates: true, selected }
    }

    #[test]
    fn interval_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let choice = pick_interval("3", "7", &mut rng);
            assert!(!choice.fell_back);
            assert!((3..=7).contains(&choice.secs));
        }
        assert_eq!(pick_interval("5", "5", &mut rng).secs, 5);
    }

    #[test]
    fn invalid_interval_falls_back() {
        let mut rng = StdRng::seed_from_u64(2);
        for (min, max) in [("0", "10"), ("10", "5"), ("abc", "10"), ("-3", "4"), ("", "")] {
            let choice = pick_interval(min, max, &mut rng);
            assert!(choice.fell_back, "{min}-{max} should fall back");
            assert!((20..=45).contains(&choice.secs));
        }
    }

    #[test]
    fn start_checks_preconditions_in_order() {
        let s = store("pre");
        let empty = ContactStore::default();
        let mut c = Campaign::default();
        let mut chk = check(&s, Some("002"));
        chk.connected = false;
        assert_eq!(c.start(chk), Err(CampaignError::Disconnected));
        assert_eq!(c.start(check(&empty, Some("002"))), Err(CampaignError::NoContacts));
        let mut chk = check(&s, Some("002"));
        chk.has_templates = false;
        assert_eq!(c.start(chk), Err(CampaignError::NoTemplates));
        assert_eq!(c.start(check(&s, None)), Err(CampaignError::NoSelection));
        assert_eq!(c.start(check(&s, Some("099"))), Err(CampaignError::SelectionNotFound));
        assert!(!c.is_running());
    }

    #[test]
    fn runs_from_selection_to_end() {
        let s = store("run");
        let mut c = Campaign::default();
        c.start(check(&s, Some("002"))).unwrap();
        assert_eq!(c.next_step(s.all()), Step::Send { n: "002".into() });

        let after = c.record(c.run_id(), s.all(), "002", SendOutcome::Success, || 30);
        assert_eq!(after, AfterSend::Wait { next: "003".into(), secs: 30 });
        assert_eq!(c.next_step(s.all()), Step::Send { n: "003".into() });

        let after = c.record(c.run_id(), s.all(), "003", SendOutcome::Failed, || unreachable!());
        assert_eq!(after, AfterSend::Finished);
        assert_eq!(c.next_step(s.all()), Step::Finished);
        assert_eq!(c.last_sent(), Some("003"));
    }

    #[test]
    fn failure_waits_one_second() {
        let s = store("fail");
        let mut c = Campaign::default();
        c.start(check(&s, Some("001"))).unwrap();
        let after = c.record(c.run_id(), s.all(), "001", SendOutcome::Failed, || 99);
        assert_eq!(after, AfterSend::Wait { next: "002".into(), secs: FAILURE_INTERVAL_SECS });
    }

    #[test]
    fn empty_list_is_a_no_op() {
        let mut c = Campaign::default();
        assert_eq!(c.next_step(&[]), Step::Finished);
        c.running = true;
        assert_eq!(c.next_step(&[]), Step::Finished);
        assert!(SendReport::from_contacts(&[], "now").is_none());
    }

    #[test]
    fn stop_ends_the_loop() {
        let s = store("stop");
        let mut c = Campaign::default();
        c.start(check(&s, Some("001"))).unwrap();
        c.stop();
        assert_eq!(c.next_step(s.all()), Step::Finished);
        let run = c.run_id();
        assert_eq!(c.record(run, s.all(), "001", SendOutcome::Success, || 5), AfterSend::Finished);
    }

    #[test]
    fn late_reply_from_stopped_run_is_ignored() {
        let s = store("restart");
        let mut c = Campaign::default();
        c.start(check(&s, Some("001"))).unwrap();
        let first_run = c.run_id();
        c.stop();
        c.start(check(&s, Some("001"))).unwrap();
        assert!(!c.is_current(first_run));

        let stale = c.record(first_run, s.all(), "001", SendOutcome::Success, || 5);
        assert_eq!(stale, AfterSend::Finished);
        assert_eq!(c.cursor(), 0);
        assert_eq!(c.last_sent(), None);
        assert!(c.is_running());

        let fresh = c.record(c.run_id(), s.all(), "001", SendOutcome::Success, || 5);
        assert_eq!(fresh, AfterSend::Wait { next: "002".into(), secs: 5 });
        assert_eq!(c.next_step(s.all()), Step::Send { n: "002".into() });
    }

    #[test]
    fn countdown_labels() {
        let mut cd = Countdown::new("002", 2);
        assert_eq!(cd.label(), "In 2s...");
        assert!(cd.tick());
        assert_eq!(cd.label(), "In 1s...");
        assert!(!cd.tick());
        assert_eq!(cd.label(), "Sending...");
    }

    #[test]
    fn report_lists_both_outcomes() {
        let mut s = store("report");
        s.set_outcome("001", SendOutcome::Success);
        s.set_outcome("003", SendOutcome::Failed);
        let report = SendReport::from_contacts(s.all(), "October 16, 2026, 10:00:00").unwrap();
        assert_eq!(report.attempted(), 2);
        let text = report.render();
        assert!(text.starts_with("Send report - October 16, 2026, 10:00:00\n"));
        assert!(text.contains("  - Attempted: 2"));
        assert!(text.contains("SUCCESSFUL SENDS:\n  - [001] Ana - (11) 91111-0000"));
        assert!(text.contains("FAILED SENDS:\n  - [003] Caio - (11) 93333-0000"));
        assert!(!text.contains("Beto"));
    }
}
