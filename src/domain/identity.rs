//! Operating identities: who created or canceled an instance.
//!
//! An identity is either a human user working for an actor, or an actor
//! acting on its own behalf (message-driven and system-driven starts).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Market-party number of the DataHub system actor
pub const DATAHUB_ACTOR_NUMBER: &str = "5790001330583";

/// Global location number of a market actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorNumber(String);

impl ActorNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market role an actor operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    EnergySupplier,
    GridAccessProvider,
    BalanceResponsibleParty,
    MeteredDataResponsible,
    SystemOperator,
    DataHubAdministrator,
}

/// A market actor: number plus role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub number: ActorNumber,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(number: impl Into<String>, role: ActorRole) -> Self {
        Self {
            number: ActorNumber::new(number),
            role,
        }
    }
}

/// A human user logged in on behalf of an actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub actor: Actor,
}

/// An actor operating without a human user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub actor: Actor,
}

/// Closed sum of the two identity kinds. The serialized form keeps the
/// variant tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatingIdentity {
    User(UserIdentity),
    Actor(ActorIdentity),
}

impl OperatingIdentity {
    pub fn user(user_id: Uuid, actor: Actor) -> Self {
        Self::User(UserIdentity { user_id, actor })
    }

    pub fn actor(actor: Actor) -> Self {
        Self::Actor(ActorIdentity { actor })
    }

    /// The fixed identity used for system-initiated work such as
    /// recurring planning.
    pub fn system() -> Self {
        Self::actor(Actor::new(
            DATAHUB_ACTOR_NUMBER,
            ActorRole::DataHubAdministrator,
        ))
    }

    /// The actor behind this identity, regardless of variant
    pub fn acting_actor(&self) -> &Actor {
        match self {
            Self::User(user) => &user.actor,
            Self::Actor(actor) => &actor.actor,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for OperatingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(user) => write!(f, "user {} ({})", user.user_id, user.actor.number),
            Self::Actor(actor) => write!(f, "actor {}", actor.actor.number),
        }
    }
}
