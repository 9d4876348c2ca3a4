use std::{fmt, io::Read, ops::Deref};

use crate::{
    btree::page::BTreePageID,
    io::{read_exact, read_into, ByteWriter, Encodeable},
    storage::schema::{Schema, Type},
};

/// A single field value. Values are totally ordered so they can serve
/// as index keys; tuples within one table are homogeneous, so the
/// cross-variant ordering the derive produces is never observed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Cell {
    Int(i32),
    Chars(String),
}

impl Cell {
    pub fn read_from<R: Read>(reader: &mut R, t: Type) -> Self {
        match t {
            Type::Int => Cell::Int(read_into(reader)),
            Type::Char(n) => {
                let len: u8 = read_into(reader);
                let block = read_exact(reader, n as usize);
                let payload = &block[..(len as usize).min(n as usize)];
                Cell::Chars(String::from_utf8_lossy(payload).to_string())
            }
        }
    }

    pub fn encode_to(&self, writer: &mut ByteWriter, t: Type) {
        match (self, t) {
            (Cell::Int(v), Type::Int) => writer.write(v),
            (Cell::Chars(s), Type::Char(n)) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(n as usize);
                writer.write(&(len as u8));
                let mut block = vec![0u8; n as usize];
                block[..len].copy_from_slice(&bytes[..len]);
                writer.write_bytes(&block);
            }
            _ => panic!("cell {:?} does not match field type {:?}", self, t),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Chars(s) => write!(f, "{:?}", s),
        }
    }
}

/// A row of cells plus its descriptor.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Tuple {
    scheme: Schema,
    cells: Vec<Cell>,
}

impl Tuple {
    pub fn new(scheme: Schema, cells: Vec<Cell>) -> Self {
        Self { scheme, cells }
    }

    /// Parse one tuple out of `bytes` (exactly `scheme.get_size()` of
    /// them are consumed).
    pub fn read_from(scheme: &Schema, bytes: &[u8]) -> Self {
        let mut reader = std::io::Cursor::new(bytes);
        let mut cells = Vec::new();
        for field in &scheme.fields {
            cells.push(Cell::read_from(&mut reader, field.field_type));
        }
        Self {
            scheme: scheme.clone(),
            cells,
        }
    }

    /// A tuple of `width` int fields, all set to `value`.
    pub fn new_int_tuples(value: i32, width: usize) -> Self {
        let scheme = crate::storage::schema::small_int_schema(width, "");
        let cells = vec![Cell::Int(value); width];
        Self { scheme, cells }
    }

    pub fn get_cell(&self, index: usize) -> Cell {
        self.cells[index].clone()
    }

    pub fn set_cell(&mut self, index: usize, cell: Cell) {
        self.cells[index] = cell;
    }

    pub fn get_scheme(&self) -> &Schema {
        &self.scheme
    }

    pub fn equal_cells(&self, expected: &[i32]) -> bool {
        if self.cells.len() != expected.len() {
            return false;
        }
        self.cells
            .iter()
            .zip(expected)
            .all(|(c, v)| *c == Cell::Int(*v))
    }
}

impl Encodeable for Tuple {
    fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        for (cell, field) in self.cells.iter().zip(&self.scheme.fields) {
            cell.encode_to(&mut writer, field.field_type);
        }
        writer.to_bytes()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content: Vec<String> =
            self.cells.iter().map(|c| format!("{}", c)).collect();
        write!(f, "({})", content.join(", "))
    }
}

/// A tuple annotated with its record id: the leaf page it sits on and
/// its slot index there.
#[derive(Clone, PartialEq, Debug)]
pub struct WrappedTuple {
    internal: Tuple,
    slot_number: usize,
    pid: BTreePageID,
}

impl Deref for WrappedTuple {
    type Target = Tuple;

    fn deref(&self) -> &Self::Target {
        &self.internal
    }
}

impl WrappedTuple {
    pub fn new(internal: Tuple, slot_number: usize, pid: BTreePageID) -> Self {
        Self {
            internal,
            slot_number,
            pid,
        }
    }

    pub fn get_slot_number(&self) -> usize {
        self.slot_number
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    pub fn get_tuple(&self) -> &Tuple {
        &self.internal
    }
}

impl fmt::Display for WrappedTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.internal, self.pid, self.slot_number)
    }
}
