pub mod crds;
pub mod lookup;
pub mod run;
pub mod version;

pub use crds::Crds;
pub use lookup::Lookup;
pub use run::Run;
pub use version::Version;
