mod certificate;
mod fingerprint;
mod metadata;
mod source;

pub use certificate::*;
pub use fingerprint::*;
pub use metadata::*;
pub use source::*;
