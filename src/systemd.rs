//! sd_notify integration for `Type=notify` units.
//!
//! Every method is a no-op when disabled or off Linux, so callers never need
//! `#[cfg]` of their own.

#[derive(Debug, Clone, Copy)]
pub struct SystemdNotifier {
    enabled: bool,
}

/// Message kinds sent to the service manager.
#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Watchdog,
    Status(&'a str),
}

impl SystemdNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `READY=1`: the watcher is running.
    pub fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    /// `STOPPING=1`: shutdown has begun.
    pub fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    /// `STATUS=<msg>` followed by a `WATCHDOG=1` keepalive.
    pub fn notify_status(&self, msg: &str) {
        self.send(Message::Status(msg));
        self.send(Message::Watchdog);
    }

    fn send(&self, msg: Message<'_>) {
        if self.enabled {
            send_impl(msg);
        }
    }
}

#[cfg(target_os = "linux")]
fn send_impl(msg: Message<'_>) {
    use sd_notify::NotifyState;

    let state = match msg {
        Message::Ready => NotifyState::Ready,
        Message::Stopping => NotifyState::Stopping,
        Message::Watchdog => NotifyState::Watchdog,
        Message::Status(s) => NotifyState::Status(s),
    };
    if let Err(e) = sd_notify::notify(false, &[state]) {
        tracing::debug!(error = %e, message = ?msg, "sd_notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn send_impl(_msg: Message<'_>) {}
