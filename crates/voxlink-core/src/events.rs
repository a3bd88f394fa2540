use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RequestError;
use crate::ids::{CorrelationToken, EntityId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Terminal status the remote reports for a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteStatus {
    Ok,
    Cancelled,
    Failed { code: u32, message: String },
}

impl RemoteStatus {
    pub fn into_result(self) -> Result<(), RequestError> {
        match self {
            Self::Ok => Ok(()),
            Self::Cancelled => Err(RequestError::Cancelled),
            Self::Failed { code, message } => Err(RequestError::Remote { code, message }),
        }
    }
}

/// One inbound notification, in the order the remote emitted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ConnectionStatus {
        status: ConnectionStatus,
        #[serde(default)]
        reason: Option<String>,
    },
    ChannelAdded {
        id: EntityId,
        parent: EntityId,
    },
    ChannelMoved {
        id: EntityId,
        parent: EntityId,
    },
    ChannelRemoved {
        id: EntityId,
    },
    ChannelOrderChanged {
        id: EntityId,
    },
    ChannelUpdated {
        id: EntityId,
    },
    ClientEntered {
        id: EntityId,
    },
    ClientUpdated {
        id: EntityId,
    },
    ClientLeft {
        id: EntityId,
    },
    TransferFinished {
        id: EntityId,
    },
    SoundFinished {
        id: EntityId,
    },
    /// One element of a multi-part result.
    ListItem {
        token: CorrelationToken,
        item: Value,
    },
    /// Terminal signal for a token.
    RequestFinished {
        token: CorrelationToken,
        status: RemoteStatus,
    },
    /// Session-level error not tied to any request.
    GeneralError {
        code: u32,
        message: String,
    },
}

impl Notification {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::ChannelAdded { .. } => "channel_added",
            Self::ChannelMoved { .. } => "channel_moved",
            Self::ChannelRemoved { .. } => "channel_removed",
            Self::ChannelOrderChanged { .. } => "channel_order_changed",
            Self::ChannelUpdated { .. } => "channel_updated",
            Self::ClientEntered { .. } => "client_entered",
            Self::ClientUpdated { .. } => "client_updated",
            Self::ClientLeft { .. } => "client_left",
            Self::TransferFinished { .. } => "transfer_finished",
            Self::SoundFinished { .. } => "sound_finished",
            Self::ListItem { .. } => "list_item",
            Self::RequestFinished { .. } => "request_finished",
            Self::GeneralError { .. } => "general_error",
        }
    }
}

/// An outgoing call handed to the transport together with its token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Successful outcome of a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Done,
    /// Items of a multi-part result; empty when the remote returned nothing.
    Listing(Vec<Value>),
}

impl Reply {
    pub fn into_listing(self) -> Vec<Value> {
        match self {
            Self::Done => Vec::new(),
            Self::Listing(items) => items,
        }
    }
}
