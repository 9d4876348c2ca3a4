use crate::storage::schema::Schema;

use super::BTreePageID;

/// The contract every page kind fulfils: construction from a disk
/// image, identity, parent linkage, and the codec + before-image pair
/// the transaction machinery relies on.
pub trait BTreePage {
    fn new(pid: &BTreePageID, bytes: &[u8], scheme: &Schema, key_field: usize) -> Self
    where
        Self: Sized;

    fn get_pid(&self) -> BTreePageID;

    fn get_parent_pid(&self) -> BTreePageID;
    fn set_parent_pid(&mut self, pid: &BTreePageID);

    /// Serialize the page to its exact on-disk image.
    ///
    /// Round-trip stable: `Self::new(pid, &p.get_page_data(), ..)`
    /// reconstructs an equal page.
    fn get_page_data(&self) -> Vec<u8>;

    /// Overwrite the before image with the current content. Called on
    /// commit, so a later abort rolls back to this point.
    fn set_before_image(&mut self);

    /// The content of this page as of the last load / commit. Abort
    /// restores pages by re-decoding this image.
    fn get_before_image(&self) -> Vec<u8>;
}
