/// State that survives a restart of the agent.
pub mod persist;
/// Test doubles for the device traits.
#[cfg(test)]
pub mod tests;
