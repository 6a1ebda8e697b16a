pub mod codec;
pub mod cycle;
pub mod descriptor;
pub mod hal;
pub mod hal_sim;
pub mod measurement;
pub mod scheduler;
#[cfg(test)]
mod testing;
pub mod transform;

pub use codec::{decode, type_size, DataType, DecodeError};
pub use cycle::{
    CycleDriver, CycleReport, TransportFault, VariableError, VariableFailure, VariableOutcome,
};
pub use descriptor::{LoadError, VariableDescriptor, VariableSet};
pub use hal::{BlockReader, MeasurementSink, ReadError, WriteError};
pub use hal_sim::SimulatedController;
pub use measurement::{Measurement, PointId};
pub use scheduler::{RunSummary, ScheduleMode, Scheduler};
pub use transform::LinearTransform;
