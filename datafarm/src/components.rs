/// Components that are placed within a grow bed.
pub mod grow_bed {
    /// Components that provide actuation capability.
    pub mod actuating {
        /// The fixed set of relay driven actuators.
        pub mod registry;
        /// Deferred forced-off protection for hazardous actuators.
        pub mod safety;
    }
    /// Components that provide sensing capability.
    pub mod sensing {
        /// Fixed capacity sample storage.
        pub mod ring;
        /// Periodic environmental and soil sampling loops.
        pub mod sampler;
    }
    /// Components that take and process photos.
    pub mod imaging {
        /// Illuminate, capture, upload and analyse workflow.
        pub mod capture;
    }
    /// Components that act on remote commands.
    pub mod control {
        /// Routes inbound bus messages to actuators and the camera.
        pub mod dispatcher;
    }
    /// Components that report state to the farm.
    pub mod reporting {
        /// Sensor telemetry publishing.
        pub mod telemetry;
    }
    /// The agent context and its run loop.
    pub mod orchestrator;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::grow_bed::actuating::registry::*;
    pub use crate::components::grow_bed::actuating::safety::*;
    pub use crate::components::grow_bed::control::dispatcher::*;
    pub use crate::components::grow_bed::imaging::capture::*;
    pub use crate::components::grow_bed::orchestrator::*;
    pub use crate::components::grow_bed::reporting::telemetry::*;
    pub use crate::components::grow_bed::sensing::ring::*;
    pub use crate::components::grow_bed::sensing::sampler::*;
}
