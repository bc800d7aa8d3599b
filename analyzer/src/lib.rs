pub mod analysis;
pub mod remote;
pub mod session;
pub mod shared;

pub mod prelude {
    pub use crate::analysis::prelude::*;
    pub use crate::remote::prelude::*;
    pub use crate::session::prelude::*;
    pub use crate::shared::prelude::*;
}
