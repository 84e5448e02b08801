mod convert;
mod field_type;
mod type_tag;
mod view;

pub use convert::{classify, Conversion, DynNum};
pub use field_type::FieldType;
pub use type_tag::ValueType;
pub use view::{LePrimitive, ReadOnlyValueView, ValueView};
