/// Size of an on-disk page reference, in bytes.
pub const INDEX_SIZE: usize = 4;
