pub mod alert;
pub mod identity;
pub mod stream;
pub mod subscription;

pub use alert::*;
pub use identity::*;
pub use stream::*;
pub use subscription::*;
