use std::fmt;

/// Field types. Every type has a fixed serialized width, so tuples are
/// fixed width and slot arithmetic stays trivial.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Type {
    /// 4-byte big-endian signed integer.
    Int,

    /// Fixed-width character block: 1 length byte followed by `n`
    /// payload bytes, zero padded.
    Char(u8),
}

pub fn get_type_length(t: Type) -> usize {
    match t {
        Type::Int => 4,
        Type::Char(n) => n as usize + 1,
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct FieldItem {
    pub field_type: Type,
    pub field_name: String,
}

impl FieldItem {
    pub fn new(field_type: Type, field_name: &str) -> Self {
        Self {
            field_type,
            field_name: field_name.to_string(),
        }
    }
}

/// The tuple descriptor: an ordered list of fixed-width fields.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<FieldItem>,
}

impl Schema {
    pub fn new(fields: Vec<FieldItem>) -> Self {
        Self { fields }
    }

    /// Serialized width of one tuple, in bytes.
    pub fn get_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| get_type_length(f.field_type))
            .sum()
    }

    pub fn fields_count(&self) -> usize {
        self.fields.len()
    }

    pub fn get_field_type(&self, index: usize) -> Type {
        self.fields[index].field_type
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<String> = self
            .fields
            .iter()
            .map(|item| format!("{}({:?})", item.field_name, item.field_type))
            .collect();
        write!(f, "<{}>", names.join(", "))
    }
}

/// A schema of `width` int fields. The workhorse of the test suite.
pub fn small_int_schema(width: usize, name_prefix: &str) -> Schema {
    let mut fields = Vec::new();
    for i in 0..width {
        fields.push(FieldItem::new(
            Type::Int,
            &format!("{}int-{}", name_prefix, i),
        ));
    }
    Schema::new(fields)
}
