//! Radio plumbing: link physics, shared channels and the device state
//! machine that places frames on them.

pub mod channel;
pub mod device;
pub mod link;
