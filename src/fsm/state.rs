use std::fmt;

/// Where a connection is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// Negotiated, waiting for HELLO.
    PreAuth,
    /// Waiting for credentials.
    Authentication,
    Ready,
    /// An auto-commit result is open.
    Streaming,
    InTransaction,
    /// Results inside an explicit transaction are open.
    TxStreaming,
    Failed,
    /// A RESET has been received and not yet processed.
    Interrupted,
    Defunct,
}

impl State {
    pub const ALL: [State; 9] = [
        State::PreAuth,
        State::Authentication,
        State::Ready,
        State::Streaming,
        State::InTransaction,
        State::TxStreaming,
        State::Failed,
        State::Interrupted,
        State::Defunct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            State::PreAuth => "PRE_AUTH",
            State::Authentication => "AUTHENTICATION",
            State::Ready => "READY",
            State::Streaming => "STREAMING",
            State::InTransaction => "TX_READY",
            State::TxStreaming => "TX_STREAMING",
            State::Failed => "FAILED",
            State::Interrupted => "INTERRUPTED",
            State::Defunct => "DEFUNCT",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
