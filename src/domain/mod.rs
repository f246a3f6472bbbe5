pub mod connector;
pub mod station;
pub mod tag;
pub mod transaction;

pub use connector::*;
pub use station::*;
pub use tag::*;
pub use transaction::*;
