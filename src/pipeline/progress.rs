use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Stage of a request that progress is being reported for
///
/// Phases are ordered: progress never moves back to an earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Downloading,
    Merging,
    Transcoding,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Downloading => "Downloading",
            Phase::Merging => "Merging streams",
            Phase::Transcoding => "Transcoding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// 0.0 to 100.0
    pub percent: f64,
}

/// Messages the background download task sends to whoever renders it
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Status(String),
}

/// Sending half handed to the pipeline
///
/// Percent values are clamped to 0..=100 and filtered so that, within one request,
/// consecutive events never go backwards.
pub struct ProgressReporter {
    tx: Option<UnboundedSender<PipelineEvent>>,
    last: Mutex<Option<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a reporter together with the receiver a front end drains
    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                last: Mutex::new(None),
            },
            rx,
        )
    }

    /// A reporter that drops everything
    pub fn silent() -> Self {
        Self {
            tx: None,
            last: Mutex::new(None),
        }
    }

    pub fn progress(&self, phase: Phase, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let event = ProgressEvent {
            phase,
            percent: percent.clamp(0.0, 100.0),
        };

        {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(prev) = *last {
                let backwards = event.phase < prev.phase
                    || (event.phase == prev.phase && event.percent <= prev.percent);
                if backwards {
                    return;
                }
            }
            *last = Some(event);
        }

        self.send(PipelineEvent::Progress(event));
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(PipelineEvent::Status(message.into()));
    }

    fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // The receiver going away only means nobody is watching anymore
            let _ = tx.send(event);
        }
    }
}
