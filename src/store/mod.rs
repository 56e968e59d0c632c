//! Template/parameter records and the in-memory Parameter Model built over them.
pub mod registry;
pub mod types;
pub mod value;

pub use registry::{ParameterModel, ParameterSpec};
pub use types::{DataType, Parameter, ParameterScope, Template};
pub use value::TypedValue;
