use tokio::sync::mpsc;

/// One progress event: fraction in [0, 1] plus a status line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub fraction: f64,
    pub message: String,
}

/// Receives progress after every ticker and once more on completion.
pub trait ProgressReporter: Send {
    fn report(&mut self, fraction: f64, message: &str);
}

impl<F> ProgressReporter for F
where
    F: FnMut(f64, &str) + Send,
{
    fn report(&mut self, fraction: f64, message: &str) {
        self(fraction, message)
    }
}

/// Discards progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _fraction: f64, _message: &str) {}
}

/// Logs progress through `tracing`.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&mut self, fraction: f64, message: &str) {
        tracing::info!("[{:>5.1}%] {}", fraction * 100.0, message);
    }
}

/// Forwards progress to a channel, for consumers running on another task.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&mut self, fraction: f64, message: &str) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(ProgressUpdate {
            fraction,
            message: message.to_string(),
        });
    }
}
