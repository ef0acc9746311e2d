//! Image processing and estimation building blocks of direct
//! (photometric) pose tracking

pub mod alignment;
pub mod candidates;
pub mod gradient;
pub mod interpolation;
pub mod pyramid;
pub mod robust;
pub mod se3;
pub mod warp;
