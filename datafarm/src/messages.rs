/// Standardise how messages are sent into and out of
/// the agent. Provide test suite to ensure interfaces
/// are respected.
pub mod control {
    /// Module messages switch a single actuator on or off.
    pub mod module;
}

/// Messages the agent reports back to the farm server.
pub mod telemetry {
    /// Periodic sensor aggregate.
    pub mod sensor;
    /// Photo analysis result.
    pub mod analysis;
}
