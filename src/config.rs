/// Tuning knobs for the resumption layer.
#[derive(Debug, Clone)]
pub struct ResumeConfig {
    /// Upper bound on the bytes the frames store retains for replay. Frames
    ///  stay in the store from the moment they are sent until the peer
    ///  acknowledges them, so a peer that stops acknowledging would otherwise
    ///  buffer us into the ground. Crossing the bound is terminal for the
    ///  connection: resumption guarantees lossless replay or nothing.
    pub cache_limit_bytes: usize,
}

impl ResumeConfig {
    pub fn new() -> ResumeConfig {
        ResumeConfig {
            cache_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        ResumeConfig::new()
    }
}
