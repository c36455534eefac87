//! Various utilities functions and types

mod fd;
mod fixed;
mod geometry;
pub mod region;

pub use self::fd::DeviceFd;
pub use self::fixed::Fixed;
pub use self::geometry::{Buffer, Coordinate, Logical, Physical, Point, Rectangle, Scale, Size};
pub use self::region::Region;
