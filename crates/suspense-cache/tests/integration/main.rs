mod suspending;

pub use utils::*;
