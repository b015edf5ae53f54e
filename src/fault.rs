// Crash probes for durability testing. Compiled to no-ops unless the
// `fault-injection` feature is enabled.

/// Abort the process with the given probability. `tag` names the crash
/// site in the log line emitted just before aborting.
#[cfg(feature = "fault-injection")]
pub fn maybe_crash(tag: &str, probability: f64) {
    if probability > 0.0 && rand::random::<f64>() < probability {
        tracing::error!(tag, probability, "fault injection: aborting process");
        std::process::abort();
    }
}

#[cfg(not(feature = "fault-injection"))]
pub fn maybe_crash(_tag: &str, _probability: f64) {}
