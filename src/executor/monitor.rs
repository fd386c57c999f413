use log::trace;
use tokio::sync::mpsc;

use crate::package::{PackageDescriptor, PackageOperation};

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Scheduled,
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    pub descriptor: PackageDescriptor,
    pub operation: PackageOperation,
    pub phase: OperationPhase,
}

/// Observer side channel for operation progress.
///
/// Events are offered with `try_send`: when the receiver is full, gone or was
/// never attached, the event is dropped and the operation carries on.
#[derive(Debug, Clone, Default)]
pub struct OperationMonitor {
    sender: Option<mpsc::Sender<OperationEvent>>,
}

impl OperationMonitor {
    /// A monitor delivering up to `capacity` undrained events to the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OperationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(
        &self,
        descriptor: &PackageDescriptor,
        operation: PackageOperation,
        phase: OperationPhase,
    ) {
        let Some(sender) = &self.sender else {
            return;
        };
        let event = OperationEvent {
            descriptor: descriptor.clone(),
            operation,
            phase,
        };
        if let Err(e) = sender.try_send(event) {
            trace!("Dropped operation event: {}", e);
        }
    }
}
