//! Message directions and logical sides.
//!
//! Every connection has two logical sides: the [`LogicalSide::Client`]
//! that initiated it and the authoritative [`LogicalSide::Server`] that
//! received it. A [`Direction`] names the side a message travels toward;
//! that side processes it on its own worker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two communicating roles of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalSide {
    /// Receiving, authoritative side.
    Server,
    /// Initiating side.
    Client,
}

impl LogicalSide {
    /// The other side of the connection.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            LogicalSide::Server => LogicalSide::Client,
            LogicalSide::Client => LogicalSide::Server,
        }
    }

    #[inline]
    pub fn is_server(self) -> bool {
        self == LogicalSide::Server
    }
}

impl fmt::Display for LogicalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalSide::Server => f.write_str("server"),
            LogicalSide::Client => f.write_str("client"),
        }
    }
}

/// Which logical side a message travels toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Initiator to receiver (server-bound).
    ToServer,
    /// Receiver to initiator (client-bound).
    ToClient,
}

impl Direction {
    /// The direction a reply to this message travels.
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }

    /// The side that processes a message traveling in this direction.
    #[inline]
    pub fn reception_side(self) -> LogicalSide {
        match self {
            Direction::ToServer => LogicalSide::Server,
            Direction::ToClient => LogicalSide::Client,
        }
    }

    /// The side that sends a message traveling in this direction.
    #[inline]
    pub fn origination_side(self) -> LogicalSide {
        self.reception_side().opposite()
    }

    /// The direction whose reception side is `side`.
    #[inline]
    pub fn toward(side: LogicalSide) -> Self {
        match side {
            LogicalSide::Server => Direction::ToServer,
            LogicalSide::Client => Direction::ToClient,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToServer => f.write_str("to_server"),
            Direction::ToClient => f.write_str("to_client"),
        }
    }
}

/// Connection phase a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Handshake, before the connection is admitted.
    Login,
    /// Regular traffic after login completed.
    Play,
}
