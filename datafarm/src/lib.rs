/**
The datafarm agent runs on the grow-bed controller and bridges its relays and sensors
to the farm message bus. Following the same layout as the rest of the machine software,
functionality is split into devices (atomic hardware or service collaborators) and
components (logical units composed from devices), with the message formats that travel
over the bus kept in their own module.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the grow bed.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Error taxonomy shared by every component.
pub mod error;
/// Message structure for communication into and out of the
/// agent over the bus.
pub mod messages;
/// Persisted state and development utilities.
pub mod utils;
