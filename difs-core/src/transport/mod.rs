pub mod memory;

pub use memory::{MemoryFace, MemoryNetwork};

use crate::{Data, Name, Result, DEFAULT_INTEREST_LIFETIME};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// A named request for one piece of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub lifetime: Duration,
    pub must_be_fresh: bool,
    pub can_be_prefix: bool,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            lifetime: DEFAULT_INTEREST_LIFETIME,
            must_be_fresh: false,
            can_be_prefix: false,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    /// Whether `data` answers this interest.
    pub fn matches(&self, data: &Data) -> bool {
        if self.can_be_prefix {
            self.name.is_prefix_of(&data.name)
        } else {
            self.name == data.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackReason {
    NoRoute,
    Congestion,
    Duplicate,
    Other(String),
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::NoRoute => f.write_str("no route"),
            NackReason::Congestion => f.write_str("congestion"),
            NackReason::Duplicate => f.write_str("duplicate"),
            NackReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// The three ways an expressed interest can end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Data(Data),
    Nack(NackReason),
    Timeout,
}

/// Named request/response primitive the operations are built on.
///
/// Each `express_interest` call is a single delivery attempt that ends in
/// data, a nack, or a timeout once the interest lifetime elapses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn express_interest(&self, interest: Interest) -> RequestOutcome;

    /// Start receiving interests under `prefix`. Dropping the receiver
    /// withdraws the registration.
    async fn register_prefix(&self, prefix: Name) -> Result<mpsc::Receiver<Interest>>;

    /// Answer every pending interest that `data` satisfies.
    async fn put_data(&self, data: Data) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn express_interest(&self, interest: Interest) -> RequestOutcome {
        (**self).express_interest(interest).await
    }

    async fn register_prefix(&self, prefix: Name) -> Result<mpsc::Receiver<Interest>> {
        (**self).register_prefix(prefix).await
    }

    async fn put_data(&self, data: Data) -> Result<()> {
        (**self).put_data(data).await
    }
}
