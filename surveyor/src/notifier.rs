use aprescore::prelude::{LogNotifier, Notifier, SurveyEvent};

/// Prints operator feedback to the terminal and mirrors it to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier {
    log: LogNotifier,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_status(&self, message: &str) {
        println!("[SURVEY] {}", message);
    }
}

impl Notifier for ConsoleNotifier {
    fn announce(&self, event: &SurveyEvent) {
        println!("[SAY] {}", event);
        self.log.announce(event);
    }
}
