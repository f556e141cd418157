use crate::error::{AppError, AppResult};
use crate::model::signal::Signal;
use crate::store::Store;

/// Result of handing a signal to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Created(String),
    /// A signal for the same session/symbol/direction was already stored,
    /// e.g. by an earlier iteration that died before marking the session.
    Existing(String),
}

impl Emission {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

pub struct SignalEmitter {
    store: Store,
}

impl SignalEmitter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn emit(&self, signal: &Signal) -> AppResult<Emission> {
        match self.store.insert_signal(signal) {
            Ok(()) => {
                tracing::info!(
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    signal_type = signal.signal_type.as_str(),
                    option_type = signal.option_type.as_str(),
                    entry = signal.entry_price,
                    target = signal.target_price,
                    stop_loss = signal.stop_loss,
                    confidence = signal.confidence,
                    "Signal emitted"
                );
                Ok(Emission::Created(signal.id.clone()))
            }
            Err(e) if e.is_duplicate() => {
                let existing = self
                    .store
                    .signal_for_breakout(signal.session_state_id, &signal.symbol, signal.direction)?
                    .ok_or_else(|| AppError::Duplicate {
                        entity: "signal",
                        key: signal.id.clone(),
                    })?;
                tracing::debug!(
                    signal_id = %existing.id,
                    session_state_id = signal.session_state_id,
                    direction = %signal.direction,
                    "Signal already stored for this breakout"
                );
                Ok(Emission::Existing(existing.id))
            }
            Err(e) => Err(e),
        }
    }
}
