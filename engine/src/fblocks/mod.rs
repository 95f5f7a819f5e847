//! Concrete functional blocks shipped with the engine: the two named in the
//! component table (link-layer source, tee) plus a capture sink for tests.

pub mod linklayer;
pub mod test_fb;
pub mod tee;

pub use linklayer::LinkLayerFb;
pub use tee::TeeFb;
pub use test_fb::TestFb;
