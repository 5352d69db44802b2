/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Output lines driving the relay board.
    pub mod gpio;
    /// Temperature and humidity sensor.
    pub mod climate;
    /// Soil moisture and water level sensor controller on the serial line.
    pub mod soil;
    /// Still camera.
    pub mod camera;
}

/// Services the agent talks to that are not attached to the board.
pub mod software {
    /// Publish / subscribe message bus.
    pub mod bus;
    /// Object storage for captured photos.
    pub mod storage;
    /// Photo coverage analysis.
    pub mod analysis;
}
