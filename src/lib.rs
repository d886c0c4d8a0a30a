#![deny(unsafe_code)]
//! Parser for the item metadata of HEIF / ISO Base Media Format files.
//!
//! The whole box tree is read in one forward pass into a [`BoxTree`]; a
//! [`HeifParser`] then answers questions about the items described by the
//! `meta` box: where their bytes are, which properties apply to them and how
//! they reference each other. Locating the EXIF payload of a HEIC image is the
//! typical use.
//!
//! This crate is written entirely in safe Rust code.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use log::{debug, warn};
use std::borrow::Cow;
use std::convert::TryInto as _;
use std::io::Read;

mod boxes;
mod read;
mod tree;

pub use crate::boxes::{BoxType, FourCC};
pub use crate::tree::{
    AssociatedProperty, AuxiliaryTypeProperty, BoxBody, BoxHeader, BoxId, BoxNode, BoxSize, BoxTree,
    ColourInformation, ConstructionMethod, DataEntryBox, ExtendedType, FileTypeBox, HandlerBox, ImageMirror,
    ImageRotation, ImageSpatialExtents, ItemInfoBox, ItemInfoEntry, ItemLocationBox, ItemLocationEntry,
    ItemLocationExtent, ItemProperties, ItemPropertyAssociation, ItemPropertyAssociationBox, ItemReferences,
    PixelInformation, PropertyAssociation, SingleItemTypeReferenceBox,
};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

/// Indicate the current offset (i.e., bytes already read) in a reader
pub(crate) trait Offset {
    fn offset(&self) -> u64;
}

/// Number of bytes that may still be read before the enclosing box (or file) ends.
pub(crate) trait BytesLeft {
    fn bytes_left(&self) -> u64;
}

/// Wraps a reader of known length to track the current offset
pub(crate) struct OffsetReader<'a, T> {
    reader: &'a mut T,
    offset: u64,
    length: u64,
}

impl<'a, T> OffsetReader<'a, T> {
    pub(crate) fn new(reader: &'a mut T, length: u64) -> Self {
        Self { reader, offset: 0, length }
    }
}

impl<T> Offset for OffsetReader<'_, T> {
    fn offset(&self) -> u64 {
        self.offset
    }
}

impl<T> BytesLeft for OffsetReader<'_, T> {
    fn bytes_left(&self) -> u64 {
        self.length.saturating_sub(self.offset)
    }
}

impl<T: Read> Read for OffsetReader<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.offset = self
            .offset
            .checked_add(bytes_read.to_u64())
            .ok_or(Error::Unsupported("total bytes read too large for offset type"))?;
        Ok(bytes_read)
    }
}

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;
#[doc(hidden)]
pub type TryString = fallible_collections::TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own parser error states and those of crates we use.
///
/// The structural kinds abort the whole parse. The per-item kinds
/// (`UnsupportedExternalReference`, `UnsupportedConstructionMethod`,
/// `OutOfBoundsOffset`, `ItemNotFound`) are only returned by queries on an
/// already parsed [`HeifParser`], so other items of the file stay usable.
#[derive(Debug)]
pub enum Error {
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// Bytes consumed by a box's fields and children don't match its declared size.
    StructuralSizeMismatch(&'static str),
    /// An item extent lies (partly) outside the file.
    OutOfBoundsOffset { offset: u64, length: u64, file_len: u64 },
    /// A box that must be present wasn't found. Carries the box type.
    MandatoryBoxMissing(&'static str),
    /// A property index of 0 or past the end of 'ipco' was dereferenced.
    InvalidPropertyIndex(u16),
    /// The item's data is not constructed from plain file offsets.
    UnsupportedConstructionMethod(u16),
    /// The item's data lives in another file, named by this 'dref' index.
    UnsupportedExternalReference(u16),
    /// An 'iloc' field size nibble outside {0, 1, 2, 4, 8}.
    InvalidSizeSelector(u8),
    /// No such item ID in the box queried.
    ItemNotFound(u32),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s) | Self::Unsupported(s) | Self::ResourceLimitExceeded(s) => s,
            Self::StructuralSizeMismatch(s) => return write!(f, "box size mismatch: {s}"),
            Self::OutOfBoundsOffset { offset, length, file_len } => {
                return write!(f, "extent {offset}+{length} exceeds file length {file_len}");
            },
            Self::MandatoryBoxMissing(name) => return write!(f, "required '{name}' box not present"),
            Self::InvalidPropertyIndex(index) => return write!(f, "invalid property index {index}"),
            Self::UnsupportedConstructionMethod(method) => {
                return write!(f, "construction_method {method} is not supported");
            },
            Self::UnsupportedExternalReference(index) => {
                return write!(f, "external data reference {index} is not supported");
            },
            Self::InvalidSizeSelector(size) => return write!(f, "field size {size} not in the set {{0, 1, 2, 4, 8}}"),
            Self::ItemNotFound(id) => return write!(f, "item {id} not found"),
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::StructuralSizeMismatch("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) | Error::StructuralSizeMismatch(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Configuration for parsing HEIF files with resource limits and validation options
///
/// Resource limits are checked **before** allocations occur, preventing out-of-memory
/// conditions from malicious files that claim unrealistic counts.
///
/// # Examples
///
/// ```rust
/// use heif_meta_parse::ParseConfig;
///
/// // Default limits (suitable for most apps)
/// let config = ParseConfig::default();
///
/// // Strict limits for untrusted input
/// let config = ParseConfig::default()
///     .with_max_items(1_000)
///     .with_max_box_depth(16);
///
/// // No limits
/// let config = ParseConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Maximum number of items declared by 'iinf', 'iloc' or 'ipma'.
    /// Default: 65,535
    pub max_items: Option<u32>,

    /// Maximum number of extents of a single 'iloc' item.
    /// Default: 4,096
    pub max_extents_per_item: Option<u32>,

    /// Maximum number of properties in 'ipco'.
    /// Default: 10,000
    pub max_properties: Option<u32>,

    /// Maximum nesting depth of boxes, top-level boxes being at depth 0.
    /// Capped at [`MAX_BOX_DEPTH`] even when `None` or set higher.
    /// Default: 32
    pub max_box_depth: Option<u32>,

    /// Maximum number of boxes in the whole tree.
    /// Default: 1,000,000
    pub max_boxes: Option<u32>,

    /// Unknown boxes with a payload up to this size keep their bytes in the
    /// tree; larger ones (typically 'mdat') are skipped.
    /// Default: 64 KiB
    pub opaque_retain_limit: u64,

    /// Enable lenient parsing mode.
    ///
    /// When true, non-critical validation errors (trailing bytes in leaf boxes,
    /// non-zero reserved bits, unexpected children, a missing leading 'ftyp')
    /// are logged and ignored instead of returning errors.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_items: Some(65_535),
            max_extents_per_item: Some(4_096),
            max_properties: Some(10_000),
            max_box_depth: Some(32),
            max_boxes: Some(1_000_000),
            opaque_retain_limit: 64 * 1024,
            lenient: false,
        }
    }
}

impl ParseConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            max_items: None,
            max_extents_per_item: None,
            max_properties: None,
            max_box_depth: None,
            max_boxes: None,
            ..Self::default()
        }
    }

    /// Set the maximum item count
    pub fn with_max_items(mut self, items: u32) -> Self {
        self.max_items = Some(items);
        self
    }

    /// Set the maximum number of extents per item
    pub fn with_max_extents_per_item(mut self, extents: u32) -> Self {
        self.max_extents_per_item = Some(extents);
        self
    }

    /// Set the maximum 'ipco' property count
    pub fn with_max_properties(mut self, properties: u32) -> Self {
        self.max_properties = Some(properties);
        self
    }

    /// Set the maximum box nesting depth
    pub fn with_max_box_depth(mut self, depth: u32) -> Self {
        self.max_box_depth = Some(depth);
        self
    }

    /// Set the maximum total box count
    pub fn with_max_boxes(mut self, boxes: u32) -> Self {
        self.max_boxes = Some(boxes);
        self
    }

    /// Set the largest unknown-box payload kept in the tree
    pub fn with_opaque_retain_limit(mut self, bytes: u64) -> Self {
        self.opaque_retain_limit = bytes;
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Nesting limit applied whatever the configuration says; every level of
/// nesting is a frame of recursion.
pub const MAX_BOX_DEPTH: u32 = 64;

pub(crate) struct ResourceTracker<'a> {
    config: &'a ParseConfig,
    box_count: u32,
}

impl<'a> ResourceTracker<'a> {
    pub(crate) fn new(config: &'a ParseConfig) -> Self {
        Self { config, box_count: 0 }
    }

    pub(crate) const fn config(&self) -> &'a ParseConfig {
        self.config
    }

    pub(crate) fn add_box(&mut self, depth: usize) -> Result<()> {
        self.box_count = self.box_count.saturating_add(1);
        if let Some(limit) = self.config.max_boxes {
            if self.box_count > limit {
                return Err(Error::ResourceLimitExceeded("box count limit exceeded"));
            }
        }
        let limit = self.config.max_box_depth.map_or(MAX_BOX_DEPTH, |limit| limit.min(MAX_BOX_DEPTH));
        if depth > limit.to_usize() {
            return Err(Error::ResourceLimitExceeded("box nesting depth limit exceeded"));
        }
        Ok(())
    }

    pub(crate) fn validate_item_count(&self, count: u32) -> Result<()> {
        if let Some(limit) = self.config.max_items {
            if count > limit {
                return Err(Error::ResourceLimitExceeded("item count limit exceeded"));
            }
        }
        Ok(())
    }

    pub(crate) fn validate_extent_count(&self, count: u16) -> Result<()> {
        if let Some(limit) = self.config.max_extents_per_item {
            if u32::from(count) > limit {
                return Err(Error::ResourceLimitExceeded("extent count limit exceeded"));
            }
        }
        Ok(())
    }

    pub(crate) fn validate_property_count(&self, count: usize) -> Result<()> {
        if let Some(limit) = self.config.max_properties {
            if count > limit.to_usize() {
                return Err(Error::ResourceLimitExceeded("property count limit exceeded"));
            }
        }
        Ok(())
    }
}

/// An absolute byte range of the file holding (part of) an item's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    fn to_usize_range(self) -> Result<std::ops::Range<usize>> {
        let start = usize::try_from(self.offset)?;
        let end = start
            .checked_add(usize::try_from(self.length)?)
            .ok_or(Error::InvalidData("extent end overflow"))?;
        Ok(start..end)
    }
}

/// Item metadata of a parsed HEIF file, backed by a borrowed or owned byte buffer.
///
/// Parsing reads the complete box tree up front and fails as a whole on any
/// structural error. The query methods never read further bytes; they only
/// combine what is in the tree. Data access methods return `Cow<[u8]>`:
/// borrowed when the item is a single contiguous extent, owned when extents
/// must be concatenated.
///
/// # Constructors
///
/// | Method | Lifetime | Zero-copy? |
/// |--------|----------|------------|
/// | [`from_bytes`](Self::from_bytes) | `'data` | Yes, borrows the slice |
/// | [`from_owned`](Self::from_owned) | `'static` | Within the owned buffer |
/// | [`from_reader`](Self::from_reader) | `'static` | Reads all, then owned |
///
/// # Example
///
/// ```no_run
/// use heif_meta_parse::HeifParser;
///
/// let bytes = std::fs::read("image.heic")?;
/// let parser = HeifParser::from_bytes(&bytes)?;
/// let exif = parser.exif_data()?; // TIFF header onwards
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct HeifParser<'data> {
    raw: Cow<'data, [u8]>,
    tree: BoxTree,
    meta: BoxId,
}

impl<'data> HeifParser<'data> {
    // ========================================
    // Constructors
    // ========================================

    /// Parse HEIF from a borrowed byte slice (true zero-copy).
    pub fn from_bytes(data: &'data [u8]) -> Result<Self> {
        Self::from_bytes_with_config(data, &ParseConfig::default())
    }

    /// Parse HEIF from a borrowed byte slice with resource limits.
    pub fn from_bytes_with_config(data: &'data [u8], config: &ParseConfig) -> Result<Self> {
        let (tree, meta) = read::read_box_tree(data, config)?;
        Ok(Self { raw: Cow::Borrowed(data), tree, meta })
    }

    /// Parse HEIF from an owned buffer.
    pub fn from_owned(data: std::vec::Vec<u8>) -> Result<HeifParser<'static>> {
        HeifParser::from_owned_with_config(data, &ParseConfig::default())
    }

    /// Parse HEIF from an owned buffer with resource limits.
    pub fn from_owned_with_config(data: std::vec::Vec<u8>, config: &ParseConfig) -> Result<HeifParser<'static>> {
        let (tree, meta) = read::read_box_tree(&data, config)?;
        Ok(HeifParser { raw: Cow::Owned(data), tree, meta })
    }

    /// Parse HEIF from a reader (reads all bytes, then parses).
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<HeifParser<'static>> {
        HeifParser::from_reader_with_config(reader, &ParseConfig::default())
    }

    /// Parse HEIF from a reader with resource limits.
    pub fn from_reader_with_config<R: Read>(reader: &mut R, config: &ParseConfig) -> Result<HeifParser<'static>> {
        let mut buf = std::vec::Vec::new();
        reader.read_to_end(&mut buf)?;
        HeifParser::from_owned_with_config(buf, config)
    }

    // ========================================
    // Tree access
    // ========================================

    /// Every box of the file, including unknown ones.
    pub const fn tree(&self) -> &BoxTree {
        &self.tree
    }

    /// The top-level 'meta' box.
    pub const fn meta(&self) -> BoxId {
        self.meta
    }

    /// Length of the underlying buffer.
    pub fn file_len(&self) -> u64 {
        self.raw.len().to_u64()
    }

    /// The leading 'ftyp' box, if any.
    pub fn file_type(&self) -> Option<&FileTypeBox> {
        self.tree.roots().find_map(|id| match self.tree.node(id).body() {
            BoxBody::FileType(ftyp) => Some(ftyp),
            _ => None,
        })
    }

    /// The 'hdlr' of the 'meta' box, naming the kind of metadata (`pict` for images).
    pub fn handler(&self) -> Option<&HandlerBox> {
        match self.meta_child(BoxType::HandlerBox)?.body() {
            BoxBody::Handler(hdlr) => Some(hdlr),
            _ => None,
        }
    }

    fn meta_child(&self, name: BoxType) -> Option<&BoxNode> {
        self.tree.find_child(self.meta, name).map(|(_, node)| node)
    }

    // ========================================
    // Items
    // ========================================

    /// The item ID named by 'pitm'.
    pub fn primary_item_id(&self) -> Result<u32> {
        match self.meta_child(BoxType::PrimaryItemBox).map(BoxNode::body) {
            Some(BoxBody::PrimaryItem(item_id)) => Ok(*item_id),
            _ => Err(Error::MandatoryBoxMissing("pitm")),
        }
    }

    /// All 'infe' entries in file order.
    pub fn item_infos(&self) -> impl Iterator<Item = &ItemInfoEntry> + '_ {
        self.tree
            .find_child(self.meta, BoxType::ItemInfoBox)
            .into_iter()
            .flat_map(move |(iinf, _)| self.tree.children(iinf))
            .filter_map(|(_, node)| match node.body() {
                BoxBody::ItemInfoEntry(infe) => Some(infe),
                _ => None,
            })
    }

    /// The 'infe' entry of `item_id`.
    pub fn find_entry(&self, item_id: u32) -> Option<&ItemInfoEntry> {
        self.item_infos().find(|infe| infe.item_id == item_id)
    }

    /// The 'iloc' box, or `MandatoryBoxMissing` if the file has none.
    pub fn item_locations(&self) -> Result<&ItemLocationBox> {
        match self.meta_child(BoxType::ItemLocationBox).map(BoxNode::body) {
            Some(BoxBody::ItemLocation(iloc)) => Ok(iloc),
            _ => Err(Error::MandatoryBoxMissing("iloc")),
        }
    }

    /// The 'dref' entry named by a 1-based data reference index.
    pub fn data_entry(&self, data_reference_index: u16) -> Option<&DataEntryBox> {
        let position = usize::from(data_reference_index).checked_sub(1)?;
        let (dinf, _) = self.tree.find_child(self.meta, BoxType::DataInformationBox)?;
        let (dref, _) = self.tree.find_child(dinf, BoxType::DataReferenceBox)?;
        let &entry = self.tree.node(dref).children().get(position)?;
        match self.tree.node(entry).body() {
            BoxBody::DataEntry(entry) => Some(entry),
            _ => None,
        }
    }

    /// Absolute file ranges holding the data of `item_id`, in extent order.
    ///
    /// Extents with length 0 run to the end of the file. Items stored in
    /// another file, or built from 'idat' or other items, are reported as
    /// errors instead of as (wrong) file offsets.
    pub fn resolve_byte_ranges(&self, item_id: u32) -> Result<TryVec<ByteRange>> {
        let entry = self.item_locations()?.find(item_id).ok_or(Error::ItemNotFound(item_id))?;

        if !entry.is_self_contained() {
            if let Some(data_entry) = self.data_entry(entry.data_reference_index) {
                debug!(
                    "item {item_id} refers to {} '{}'",
                    data_entry.entry_type,
                    std::string::String::from_utf8_lossy(&data_entry.location)
                );
            }
            return Err(Error::UnsupportedExternalReference(entry.data_reference_index));
        }
        if entry.construction_method != ConstructionMethod::File {
            return Err(Error::UnsupportedConstructionMethod(entry.construction_method.to_u16()));
        }

        let file_len = self.file_len();
        let mut ranges = TryVec::with_capacity(entry.extents.len())?;
        for extent in &entry.extents {
            let absolute = extent.absolute_offset();
            let out_of_bounds = Error::OutOfBoundsOffset {
                offset: absolute.unwrap_or(u64::MAX),
                length: extent.length,
                file_len,
            };
            let offset = match absolute {
                Some(offset) if offset <= file_len => offset,
                _ => return Err(out_of_bounds),
            };
            // "If the length is not specified, or specified as zero, then the entire length of
            //  the source is implied" ISO 14496-12:2015 § 8.11.3.1
            let length = if extent.length == 0 { file_len - offset } else { extent.length };
            match offset.checked_add(length) {
                Some(end) if end <= file_len => ranges.push(ByteRange { offset, length })?,
                _ => return Err(out_of_bounds),
            }
        }
        Ok(ranges)
    }

    /// The bytes of an item, borrowed when it is a single extent.
    pub fn item_data(&self, item_id: u32) -> Result<Cow<'_, [u8]>> {
        let ranges = self.resolve_byte_ranges(item_id)?;
        let raw = self.raw.as_ref();

        // Fast path: single extent → borrow directly from raw
        if let [range] = &ranges[..] {
            let slice = raw.get(range.to_usize_range()?).ok_or(Error::InvalidData("extent out of bounds in raw buffer"))?;
            return Ok(Cow::Borrowed(slice));
        }

        let mut data = TryVec::new();
        for range in &ranges {
            let slice = raw.get(range.to_usize_range()?).ok_or(Error::InvalidData("extent out of bounds in raw buffer"))?;
            data.extend_from_slice(slice)?;
        }
        Ok(Cow::Owned(data.to_vec()))
    }

    // ========================================
    // Properties
    // ========================================

    /// A view over 'iprp'. Fails if the box is absent or doesn't start with 'ipco'.
    pub fn item_properties(&self) -> Result<ItemProperties<'_>> {
        let (iprp, _) = self
            .tree
            .find_child(self.meta, BoxType::ItemPropertiesBox)
            .ok_or(Error::MandatoryBoxMissing("iprp"))?;
        ItemProperties::new(&self.tree, iprp)
    }

    /// Properties associated with `item_id`, in association order.
    pub fn resolve_properties(&self, item_id: u32) -> Result<TryVec<AssociatedProperty<'_>>> {
        self.item_properties()?.property_list_by_item(item_id)
    }

    /// The 'ipco' property at a 1-based index.
    pub fn property_by_index(&self, index: u16) -> Result<&BoxNode> {
        self.item_properties()?.property_by_index(index)
    }

    // ========================================
    // References
    // ========================================

    /// A view over 'iref', if the file has one.
    pub fn item_references(&self) -> Option<ItemReferences<'_>> {
        self.tree
            .find_child(self.meta, BoxType::ItemReferenceBox)
            .map(|(iref, _)| ItemReferences::new(&self.tree, iref))
    }

    /// Items with a `reference_type` reference to `item_id`, e.g. the thumbnails
    /// (`thmb`) or metadata (`cdsc`) of an image.
    pub fn resolve_references_to(&self, item_id: u32, reference_type: impl Into<FourCC>) -> Result<TryVec<u32>> {
        let reference_type = reference_type.into();
        let mut ids = TryVec::new();
        if let Some(iref) = self.item_references() {
            for from in iref.find_links_to(reference_type, item_id) {
                ids.push(from)?;
            }
        }
        Ok(ids)
    }

    /// Items that `item_id` references with `reference_type`, e.g. the tiles
    /// (`dimg`) of a grid.
    pub fn resolve_references_from(&self, item_id: u32, reference_type: impl Into<FourCC>) -> Result<TryVec<u32>> {
        let reference_type = reference_type.into();
        let mut ids = TryVec::new();
        if let Some(iref) = self.item_references() {
            for to in iref.references_from(reference_type, item_id) {
                ids.push(to)?;
            }
        }
        Ok(ids)
    }

    // ========================================
    // EXIF
    // ========================================

    /// The EXIF item of the file.
    ///
    /// An EXIF item describing the primary item ('cdsc' reference) is preferred;
    /// otherwise the first EXIF item in 'iinf' is used.
    pub fn exif_item_id(&self) -> Option<u32> {
        let describes_primary = self.primary_item_id().ok().and_then(|primary| {
            let iref = self.item_references()?;
            iref.find_links_to(FourCC::from(b"cdsc"), primary)
                .find(|&id| self.find_entry(id).is_some_and(ItemInfoEntry::is_exif))
        });
        describes_primary.or_else(|| self.item_infos().find(|infe| infe.is_exif()).map(|infe| infe.item_id))
    }

    /// EXIF payload starting at the TIFF header.
    ///
    /// The EXIF item starts with a 32-bit offset to the TIFF header, which is
    /// stripped here. See ISO 23008-12:2017 § A.2.1
    pub fn exif_data(&self) -> Result<Cow<'_, [u8]>> {
        let item_id = self.exif_item_id().ok_or(Error::InvalidData("no Exif item in iinf"))?;
        let data = self.item_data(item_id)?;
        let header: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::InvalidData("Exif item too small"))?;
        let start = u32::from_be_bytes(header).to_usize().checked_add(4).ok_or(Error::InvalidData("invalid Exif header offset"))?;
        if start > data.len() {
            warn!("Exif TIFF header offset {} past end of item ({} bytes)", start - 4, data.len());
            return Err(Error::InvalidData("invalid Exif header offset"));
        }
        Ok(match data {
            Cow::Borrowed(slice) => Cow::Borrowed(&slice[start..]),
            Cow::Owned(mut vec) => {
                vec.drain(..start);
                Cow::Owned(vec)
            },
        })
    }
}

#[test]
fn offset_reader_tracks_position_and_remaining() {
    let data = [1u8, 2, 3, 4, 5];
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut reader = OffsetReader::new(&mut cursor, 5);
    let mut buf = [0u8; 3];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(reader.offset(), 3);
    assert_eq!(reader.bytes_left(), 2);
}

#[test]
fn error_converts_to_io_error_kind() {
    let err: std::io::Error = Error::StructuralSizeMismatch("x").into();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    let err: std::io::Error = Error::UnexpectedEOF.into();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn resource_tracker_limits() {
    let config = ParseConfig::default().with_max_items(2).with_max_box_depth(1).with_max_boxes(2);
    let mut tracker = ResourceTracker::new(&config);
    assert!(tracker.validate_item_count(2).is_ok());
    assert!(matches!(tracker.validate_item_count(3), Err(Error::ResourceLimitExceeded(_))));
    assert!(tracker.add_box(1).is_ok());
    assert!(matches!(tracker.add_box(2), Err(Error::ResourceLimitExceeded(_))));
    assert!(matches!(tracker.add_box(0), Err(Error::ResourceLimitExceeded(_))));

    let unlimited = ParseConfig::unlimited();
    let tracker = ResourceTracker::new(&unlimited);
    assert!(tracker.validate_item_count(u32::MAX).is_ok());
    assert!(tracker.validate_extent_count(u16::MAX).is_ok());
}

#[test]
fn box_depth_is_capped_without_a_limit() {
    for config in [ParseConfig::unlimited(), ParseConfig::default().with_max_box_depth(u32::MAX)] {
        let mut tracker = ResourceTracker::new(&config);
        assert!(tracker.add_box(MAX_BOX_DEPTH.to_usize()).is_ok());
        assert!(matches!(tracker.add_box(MAX_BOX_DEPTH.to_usize() + 1), Err(Error::ResourceLimitExceeded(_))));
    }
}
