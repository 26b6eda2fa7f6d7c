//! Connection status published by every handler

use crate::types::WalletInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handler connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session
    #[default]
    Idle,
    /// Negotiation in flight
    Listening,
    /// Transport session exists, wallet approval pending
    ConnectedToRelay,
    /// Wallet approved, identity known
    ConnectedToWallet,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::ConnectedToWallet)
    }

    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            ConnectionState::Listening | ConnectionState::ConnectedToRelay
        )
    }
}

/// Snapshot of a handler's status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub state: ConnectionState,
    pub connected_wallet: Option<WalletInfo>,
    /// Current relay/pairing URI, for QR display
    pub connection_deeplink: Option<String>,
}

/// Receiver of status changes. Exactly one listener is attached per handler.
pub trait WalletStatusListener: Send + Sync {
    fn status_changed(&self, status: &WalletStatus);
}

impl<F> WalletStatusListener for F
where
    F: Fn(&WalletStatus) + Send + Sync,
{
    fn status_changed(&self, status: &WalletStatus) {
        self(status)
    }
}

/// Single-writer status owned by a handler.
///
/// Every mutation that changes the snapshot notifies the attached listener
/// after the lock is released.
#[derive(Default)]
pub struct StatusCell {
    status: Mutex<WalletStatus>,
    listener: Mutex<Option<Arc<dyn WalletStatusListener>>>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> WalletStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.lock().state
    }

    pub fn connected_wallet(&self) -> Option<WalletInfo> {
        self.status.lock().connected_wallet.clone()
    }

    /// Replace the listener; `None` detaches forwarding
    pub fn set_listener(&self, listener: Option<Arc<dyn WalletStatusListener>>) {
        *self.listener.lock() = listener;
    }

    pub fn update(&self, f: impl FnOnce(&mut WalletStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            let before = status.clone();
            f(&mut status);
            if *status == before {
                return;
            }
            status.clone()
        };
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.status_changed(&snapshot);
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.update(|status| status.state = state);
    }

    /// Move from `from` to `to` atomically; `false` if the state was not `from`
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut moved = false;
        self.update(|status| {
            if status.state == from {
                status.state = to;
                moved = true;
            }
        });
        moved
    }

    /// Back to `Idle` with no wallet and no deeplink
    pub fn reset(&self) {
        self.update(|status| *status = WalletStatus::default());
    }
}

impl std::fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCell")
            .field("status", &*self.status.lock())
            .finish()
    }
}
