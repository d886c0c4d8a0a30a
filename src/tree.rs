// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The parsed box tree.
//!
//! Every box read from the file becomes a [`BoxNode`] in a flat arena owned by
//! [`BoxTree`]. Nodes refer to their parent and children by [`BoxId`] rather
//! than by reference, so the tree can be walked in either direction without
//! ownership cycles.

use crate::boxes::{BoxType, FourCC};
use crate::{Error, Result, TryString, TryVec};
use arrayvec::ArrayVec;
use log::warn;
use std::fmt;

/// Index of a box inside a [`BoxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(usize);

impl BoxId {
    /// Position of the box in parse order (depth-first, pre-order).
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Declared size of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSize {
    /// Total size in bytes, header included.
    Declared(u64),
    /// Raw size field was 0: the box extends to the end of its enclosing
    /// box, or of the file for top-level boxes.
    ToEnd,
}

/// The 16-byte user type of a `uuid` box. Never interpreted, only displayed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExtendedType(pub [u8; 16]);

impl fmt::Display for ExtendedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtendedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtendedType({self})")
    }
}

/// Basic ISO box structure.
///
/// mp4 files are a sequence of possibly-nested 'box' structures.  Each box
/// begins with a header describing the length of the box's data and a
/// four-byte box type which identifies the type of the box. Together these
/// are enough to interpret the contents of that section of the file.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    /// Box type.
    pub(crate) name: BoxType,
    /// Size of the box in bytes.
    pub(crate) size: BoxSize,
    /// Length of the header, i.e. offset of the payload from `start`.
    pub(crate) offset: u64,
    /// Position of the first header byte in the file.
    pub(crate) start: u64,
    /// Uuid for extended type.
    pub(crate) uuid: Option<ExtendedType>,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    pub(crate) const MIN_SIZE: u64 = 8;
    /// 4-byte size + 4-byte type + 8-byte size
    pub(crate) const MIN_LARGE_SIZE: u64 = 16;

    #[must_use]
    pub fn box_type(&self) -> FourCC {
        self.name.into()
    }

    #[must_use]
    pub const fn size(&self) -> BoxSize {
        self.size
    }

    /// True when the raw size field was 0.
    #[must_use]
    pub const fn extends_to_end(&self) -> bool {
        matches!(self.size, BoxSize::ToEnd)
    }

    /// Bytes taken by the size, type, largesize and usertype fields.
    #[must_use]
    pub const fn header_len(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub const fn extended_type(&self) -> Option<ExtendedType> {
        self.uuid
    }

    /// Declared payload size, i.e. the declared size minus the header.
    ///
    /// Fails for boxes that extend to the end of the stream, whose size is not
    /// known from the header alone.
    pub fn payload_size(&self) -> Result<u64> {
        match self.size {
            BoxSize::Declared(size) => size
                .checked_sub(self.offset)
                .ok_or(Error::StructuralSizeMismatch("box size smaller than its header")),
            BoxSize::ToEnd => Err(Error::InvalidData("box extends to end of stream and has no declared size")),
        }
    }
}

/// File type box 'ftyp'.
/// See ISO 14496-12:2015 § 4.3
#[derive(Debug)]
pub struct FileTypeBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: TryVec<FourCC>,
}

impl FileTypeBox {
    /// Whether the major or any compatible brand is one of the HEIF image brands.
    #[must_use]
    pub fn is_heif(&self) -> bool {
        const HEIF_BRANDS: [&[u8; 4]; 7] = [b"mif1", b"msf1", b"heic", b"heix", b"heim", b"heis", b"avif"];
        std::iter::once(&self.major_brand)
            .chain(self.compatible_brands.iter())
            .any(|brand| HEIF_BRANDS.iter().any(|b| brand == *b))
    }
}

/// Handler reference box 'hdlr'
#[derive(Debug)]
pub struct HandlerBox {
    pub handler_type: FourCC,
    pub name: TryString,
}

/// Header fields of an 'iinf' box. The entries are its children.
#[derive(Debug, Clone, Copy)]
pub struct ItemInfoBox {
    pub version: u8,
    pub entry_count: u32,
}

/// Used for 'infe' boxes within 'iinf' boxes
/// See ISO 14496-12:2015 § 8.11.6
#[derive(Debug)]
pub struct ItemInfoEntry {
    pub version: u8,
    pub flags: u32,
    pub item_id: u32,
    pub item_protection_index: u16,
    /// Only present from version 2 on.
    pub item_type: Option<FourCC>,
    pub item_name: TryString,
    pub content_type: Option<TryString>,
    pub content_encoding: Option<TryString>,
    pub item_uri_type: Option<TryString>,
    /// Version 1 only, found after the content encoding.
    pub extension_type: Option<FourCC>,
}

impl ItemInfoEntry {
    /// Whether this entry describes an EXIF metadata item.
    ///
    /// Versions 0 and 1 have no item type, so they fall back to the item name.
    #[must_use]
    pub fn is_exif(&self) -> bool {
        match self.item_type {
            Some(item_type) => item_type == b"Exif",
            None => self.item_name.eq_ignore_ascii_case(b"Exif"),
        }
    }

    #[must_use]
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        std::string::String::from_utf8_lossy(&self.item_name)
    }
}

/// How the extents of an 'iloc' item are to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstructionMethod {
    File,
    Idat,
    Item,
    /// A value outside {0, 1, 2}; kept so resolution can refuse it per item.
    Other(u16),
}

impl ConstructionMethod {
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::File => 0,
            Self::Idat => 1,
            Self::Item => 2,
            Self::Other(method) => method,
        }
    }
}

impl From<u16> for ConstructionMethod {
    fn from(method: u16) -> Self {
        match method {
            0 => Self::File,
            1 => Self::Idat,
            2 => Self::Item,
            other => Self::Other(other),
        }
    }
}

/// Used for 'iloc' boxes
/// See ISO 14496-12:2015 § 8.11.3
#[derive(Debug)]
pub struct ItemLocationBox {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    pub base_offset_size: u8,
    pub index_size: u8,
    pub items: TryVec<ItemLocationEntry>,
}

impl ItemLocationBox {
    #[must_use]
    pub fn find(&self, item_id: u32) -> Option<&ItemLocationEntry> {
        self.items.iter().find(|item| item.item_id == item_id)
    }
}

#[derive(Debug)]
pub struct ItemLocationEntry {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    /// 0 means "this file". Anything else points into 'dref' and is not resolved.
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: TryVec<ItemLocationExtent>,
}

impl ItemLocationEntry {
    #[must_use]
    pub const fn is_self_contained(&self) -> bool {
        self.data_reference_index == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLocationExtent {
    /// 0 when the box carries no extent indices.
    pub index: u64,
    pub offset: u64,
    /// 0 means "to the end of the source".
    pub length: u64,
    /// Copied from the owning entry.
    pub base_offset: u64,
}

impl ItemLocationExtent {
    /// `base_offset + offset`, or `None` on overflow.
    #[must_use]
    pub const fn absolute_offset(&self) -> Option<u64> {
        self.base_offset.checked_add(self.offset)
    }
}

/// A single association record of an 'ipma' entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    pub essential: bool,
    /// 1-based index into 'ipco'. 0 means "no property".
    pub property_index: u16,
}

#[derive(Debug)]
pub struct ItemPropertyAssociation {
    pub item_id: u32,
    pub associations: TryVec<PropertyAssociation>,
}

/// See ISO 23008-12:2017 § 9.3.1
#[derive(Debug)]
pub struct ItemPropertyAssociationBox {
    pub version: u8,
    pub flags: u32,
    pub entries: TryVec<ItemPropertyAssociation>,
}

/// One child of 'iref'. The box type is the reference type.
/// See ISO 14496-12:2015 § 8.11.12
#[derive(Debug)]
pub struct SingleItemTypeReferenceBox {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: TryVec<u32>,
}

/// A 'url ' or 'urn ' entry of a 'dref' box.
/// See ISO 14496-12:2015 § 8.7.2
#[derive(Debug)]
pub struct DataEntryBox {
    pub entry_type: FourCC,
    pub flags: u32,
    /// Only carried by 'urn ' entries.
    pub name: Option<TryString>,
    /// Empty for self-contained entries.
    pub location: TryString,
}

impl DataEntryBox {
    pub(crate) const SELF_CONTAINED: u32 = 0x00_0001;

    #[must_use]
    pub const fn is_self_contained(&self) -> bool {
        self.flags & Self::SELF_CONTAINED != 0
    }
}

/// Image spatial extents (dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

/// 'irot': rotation in steps of 90° anti-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRotation {
    pub angle: u8,
}

impl ImageRotation {
    #[must_use]
    pub const fn degrees(self) -> u16 {
        self.angle as u16 * 90
    }
}

/// 'imir': 0 mirrors about a vertical axis, 1 about a horizontal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMirror {
    pub axis: u8,
}

#[derive(Debug, PartialEq)]
pub enum ColourInformation {
    Nclx {
        colour_primaries: u16,
        transfer_characteristics: u16,
        matrix_coefficients: u16,
        full_range: bool,
    },
    /// Raw ICC profile bytes from a 'rICC' or 'prof' colour type.
    Icc(TryVec<u8>),
    Unknown(FourCC),
}

/// 'pixi': bits per channel, one entry per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelInformation {
    pub bits_per_channel: ArrayVec<u8, 16>,
}

#[derive(Debug, PartialEq)]
pub struct AuxiliaryTypeProperty {
    pub(crate) aux_data: TryString,
}

impl AuxiliaryTypeProperty {
    /// The auxiliary type URN, e.g. `urn:mpeg:hevc:2015:auxid:1` for alpha planes.
    #[must_use]
    pub fn aux_type(&self) -> &[u8] {
        self.aux_data.split(|&b| b == b'\0').next().unwrap_or_default()
    }

    /// Type-specific bytes following the URN's terminating NUL.
    #[must_use]
    pub fn aux_subtype(&self) -> &[u8] {
        match self.aux_data.iter().position(|&b| b == b'\0') {
            Some(end) => &self.aux_data[end + 1..],
            None => &[],
        }
    }
}

/// What a box turned out to contain.
///
/// Containers only keep their own fields; their children are separate nodes.
#[derive(Debug)]
pub enum BoxBody {
    FileType(FileTypeBox),
    Meta,
    Handler(HandlerBox),
    PrimaryItem(u32),
    ItemInfo(ItemInfoBox),
    ItemInfoEntry(ItemInfoEntry),
    ItemLocation(ItemLocationBox),
    ItemProperties,
    ItemPropertyContainer,
    ItemPropertyAssociation(ItemPropertyAssociationBox),
    /// 'iref' with its version, which sets the item ID width of the children.
    ItemReference { version: u8 },
    ItemReferenceType(SingleItemTypeReferenceBox),
    DataInformation,
    DataReference { entry_count: u32 },
    DataEntry(DataEntryBox),
    ImageSpatialExtents(ImageSpatialExtents),
    ImageRotation(ImageRotation),
    ImageMirror(ImageMirror),
    ColourInformation(ColourInformation),
    PixelInformation(PixelInformation),
    AuxiliaryType(AuxiliaryTypeProperty),
    /// A box this parser doesn't interpret. The payload is kept when small
    /// enough, otherwise it was skipped.
    Opaque(Option<TryVec<u8>>),
}

#[derive(Debug)]
pub struct BoxNode {
    header: BoxHeader,
    payload_len: u64,
    parent: Option<BoxId>,
    children: TryVec<BoxId>,
    body: BoxBody,
}

impl BoxNode {
    #[must_use]
    pub const fn header(&self) -> &BoxHeader {
        &self.header
    }

    #[must_use]
    pub fn box_type(&self) -> FourCC {
        self.header.box_type()
    }

    #[must_use]
    pub(crate) const fn name(&self) -> BoxType {
        self.header.name
    }

    #[must_use]
    pub const fn body(&self) -> &BoxBody {
        &self.body
    }

    #[must_use]
    pub const fn parent(&self) -> Option<BoxId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[BoxId] {
        &self.children
    }

    /// Payload length actually covered by this box, also for size-0 boxes.
    #[must_use]
    pub const fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// File offset one past the last byte of the box.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.header.start + self.header.offset + self.payload_len
    }

    #[must_use]
    pub const fn is_opaque(&self) -> bool {
        matches!(self.body, BoxBody::Opaque(_))
    }
}

/// Arena of all boxes read from a file.
#[derive(Debug)]
pub struct BoxTree {
    nodes: TryVec<BoxNode>,
}

impl BoxTree {
    pub(crate) fn new() -> Self {
        Self { nodes: TryVec::new() }
    }

    /// Add a box in parse order. The body is filled in once it has been read.
    pub(crate) fn push(&mut self, header: BoxHeader, payload_len: u64, parent: Option<BoxId>) -> Result<BoxId> {
        let id = BoxId(self.nodes.len());
        self.nodes.push(BoxNode {
            header,
            payload_len,
            parent,
            children: TryVec::new(),
            body: BoxBody::Opaque(None),
        })?;
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id)?;
        }
        Ok(id)
    }

    pub(crate) fn set_body(&mut self, id: BoxId, body: BoxBody) {
        self.nodes[id.0].body = body;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics if `id` did not come from this tree.
    #[must_use]
    pub fn node(&self, id: BoxId) -> &BoxNode {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn get(&self, id: BoxId) -> Option<&BoxNode> {
        self.nodes.get(id.0)
    }

    /// Top-level boxes in file order.
    pub fn roots(&self) -> impl Iterator<Item = BoxId> + '_ {
        self.nodes.iter().enumerate().filter(|(_, n)| n.parent.is_none()).map(|(i, _)| BoxId(i))
    }

    pub fn children(&self, id: BoxId) -> impl Iterator<Item = (BoxId, &BoxNode)> + '_ {
        self.nodes[id.0].children.iter().map(move |&child| (child, &self.nodes[child.0]))
    }

    /// First direct child of `id` with the given type.
    pub(crate) fn find_child(&self, id: BoxId, name: BoxType) -> Option<(BoxId, &BoxNode)> {
        self.children(id).find(|(_, node)| node.name() == name)
    }

    /// Nesting depth: 0 for top-level boxes.
    #[must_use]
    pub fn depth(&self, id: BoxId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent.0].parent;
        }
        depth
    }

    /// All boxes in depth-first pre-order, i.e. file order.
    pub fn iter(&self) -> impl Iterator<Item = (BoxId, &BoxNode)> + '_ {
        self.nodes.iter().enumerate().map(|(i, n)| (BoxId(i), n))
    }
}

/// A property of an item together with how it was associated.
#[derive(Debug, Clone, Copy)]
pub struct AssociatedProperty<'a> {
    pub essential: bool,
    pub property_index: u16,
    pub property: &'a BoxNode,
}

/// Read-only view over an 'iprp' box.
#[derive(Clone, Copy)]
pub struct ItemProperties<'a> {
    tree: &'a BoxTree,
    ipco: BoxId,
    iprp: BoxId,
}

impl<'a> ItemProperties<'a> {
    /// Fails with `MandatoryBoxMissing` if the first child of `iprp` isn't 'ipco'.
    pub(crate) fn new(tree: &'a BoxTree, iprp: BoxId) -> Result<Self> {
        match tree.node(iprp).children().first() {
            Some(&ipco) if tree.node(ipco).name() == BoxType::ItemPropertyContainerBox => Ok(Self { tree, ipco, iprp }),
            _ => Err(Error::MandatoryBoxMissing("ipco")),
        }
    }

    #[must_use]
    pub fn property_count(&self) -> usize {
        self.tree.node(self.ipco).children().len()
    }

    /// Look up a property by its 1-based 'ipco' index.
    ///
    /// Index 0 is the "no property" sentinel and is rejected along with
    /// indices past the end.
    pub fn property_by_index(&self, index: u16) -> Result<&'a BoxNode> {
        let properties = self.tree.node(self.ipco).children();
        let position = usize::from(index).checked_sub(1).ok_or(Error::InvalidPropertyIndex(index))?;
        let &id = properties.get(position).ok_or(Error::InvalidPropertyIndex(index))?;
        Ok(self.tree.node(id))
    }

    /// All 'ipma' blocks, in file order.
    pub fn association_boxes(self) -> impl Iterator<Item = &'a ItemPropertyAssociationBox> + 'a {
        self.tree.children(self.iprp).filter_map(|(_, node)| match node.body() {
            BoxBody::ItemPropertyAssociation(ipma) => Some(ipma),
            _ => None,
        })
    }

    /// Properties associated with `item_id`, across every 'ipma' block in order.
    /// Associations with index 0, or past the end of 'ipco', are skipped.
    pub fn property_list_by_item(&self, item_id: u32) -> Result<TryVec<AssociatedProperty<'a>>> {
        let mut list = TryVec::new();
        for ipma in self.association_boxes() {
            for entry in ipma.entries.iter().filter(|e| e.item_id == item_id) {
                for a in entry.associations.iter().filter(|a| a.property_index != 0) {
                    let Ok(property) = self.property_by_index(a.property_index) else {
                        warn!(
                            "item {item_id} is associated with property {}, but 'ipco' only has {}",
                            a.property_index,
                            self.property_count()
                        );
                        continue;
                    };
                    list.push(AssociatedProperty {
                        essential: a.essential,
                        property_index: a.property_index,
                        property,
                    })?;
                }
            }
        }
        Ok(list)
    }
}

/// Read-only view over an 'iref' box.
#[derive(Clone, Copy)]
pub struct ItemReferences<'a> {
    tree: &'a BoxTree,
    iref: BoxId,
}

impl<'a> ItemReferences<'a> {
    pub(crate) const fn new(tree: &'a BoxTree, iref: BoxId) -> Self {
        Self { tree, iref }
    }

    pub fn edges(self) -> impl Iterator<Item = &'a SingleItemTypeReferenceBox> + 'a {
        self.tree.children(self.iref).filter_map(|(_, node)| match node.body() {
            BoxBody::ItemReferenceType(r) => Some(r),
            _ => None,
        })
    }

    /// From-IDs of `reference_type` edges whose target list contains `to_item_id`.
    pub fn find_links_to(self, reference_type: FourCC, to_item_id: u32) -> impl Iterator<Item = u32> + 'a {
        self.edges()
            .filter(move |r| r.reference_type == reference_type && r.to_item_ids.contains(&to_item_id))
            .map(|r| r.from_item_id)
    }

    /// Targets of `reference_type` edges leaving `from_item_id`, in reference order.
    pub fn references_from(self, reference_type: FourCC, from_item_id: u32) -> impl Iterator<Item = u32> + 'a {
        self.edges()
            .filter(move |r| r.reference_type == reference_type && r.from_item_id == from_item_id)
            .flat_map(|r| r.to_item_ids.iter().copied())
    }
}
