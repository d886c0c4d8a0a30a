// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Box readers: header decoding, the type dispatch and one reader per box.
//!
//! All reads go through a single cursor. Each box sees only its own payload
//! (a `Take` over its parent), so a reader can never run into a sibling, and
//! unread or missing bytes show up as a size mismatch when the box is closed.

use crate::boxes::{BoxType, FourCC};
use crate::tree::{
    AuxiliaryTypeProperty, BoxBody, BoxHeader, BoxId, BoxSize, BoxTree, ColourInformation, ConstructionMethod,
    DataEntryBox, ExtendedType, FileTypeBox, HandlerBox, ImageMirror, ImageRotation, ImageSpatialExtents,
    ItemInfoBox, ItemInfoEntry, ItemLocationBox, ItemLocationEntry, ItemLocationExtent, ItemPropertyAssociation,
    ItemPropertyAssociationBox, PixelInformation, PropertyAssociation, SingleItemTypeReferenceBox,
};
use crate::{
    BytesLeft, Error, Offset, OffsetReader, ParseConfig, ResourceTracker, Result, ToU64, ToUsize, TryString, TryVec,
};
use arrayvec::ArrayVec;
use bitreader::BitReader;
use byteorder::ReadBytesExt;
use log::{debug, warn};
use std::io::{Read, Take};

/// The cursor every box reader works on.
///
/// Container readers recurse through this trait object so that nesting boxes
/// doesn't nest reader types.
pub(crate) trait ByteSource: Read + Offset + BytesLeft {}

impl<T: Read + Offset + BytesLeft> ByteSource for T {}

/// See ISO 14496-12:2015 § 4.2
pub(crate) struct BMFFBox<'a, T: ?Sized> {
    head: BoxHeader,
    content: Take<&'a mut T>,
}

type Source<'a, 'b> = BMFFBox<'a, dyn ByteSource + 'b>;

impl<T: Read + ?Sized> BMFFBox<'_, T> {
    fn read_into_try_vec(&mut self) -> std::io::Result<TryVec<u8>> {
        let limit = usize::try_from(self.content.limit()).map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        let mut vec = std::vec::Vec::new();
        vec.try_reserve_exact(limit)
            .map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        self.content.read_to_end(&mut vec)?; // The default impl
        Ok(vec.into())
    }

    fn bytes_left(&self) -> u64 {
        self.content.limit()
    }

    /// Declared size minus the bytes consumed so far.
    ///
    /// Undefined for a box whose size field was 0.
    fn remaining(&self) -> Result<u64> {
        self.head.payload_size()?;
        Ok(self.bytes_left())
    }

    const fn get_header(&self) -> &BoxHeader {
        &self.head
    }
}

impl<'a, 'b> Source<'a, 'b> {
    fn box_iter(&mut self) -> BoxIter<'_> {
        BoxIter::new(self)
    }
}

#[cfg(test)]
fn test_box<'a, 'b>(name: BoxType, data: &'a mut &'b [u8]) -> BMFFBox<'a, &'b [u8]> {
    let len = data.len().to_u64();
    BMFFBox {
        head: BoxHeader { name, size: BoxSize::Declared(len + 8), offset: 8, start: 0, uuid: None },
        content: <_ as Read>::take(data, len),
    }
}

#[test]
fn box_read_to_end() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::FileTypeBox, size: BoxSize::Declared(13), offset: 8, start: 0, uuid: None },
        content: <_ as Read>::take(tmp, 5),
    };
    let buf = src.read_into_try_vec().unwrap();
    assert_eq!(buf.len(), 5);
    assert_eq!(buf, b"12345".as_ref());
}

#[test]
fn box_read_to_end_oom() {
    let tmp = &mut b"1234567890".as_slice();
    let mut src = BMFFBox {
        head: BoxHeader { name: BoxType::FileTypeBox, size: BoxSize::Declared(5), offset: 8, start: 0, uuid: None },
        content: <_ as Read>::take(tmp, u64::MAX / 2),
    };
    assert!(src.read_into_try_vec().is_err());
}

pub(crate) struct BoxIter<'a> {
    src: &'a mut (dyn ByteSource + 'a),
}

impl<'a> BoxIter<'a> {
    fn new(src: &'a mut (dyn ByteSource + 'a)) -> Self {
        BoxIter { src }
    }

    fn bytes_left(&self) -> u64 {
        self.src.bytes_left()
    }

    /// Read the next child header and bound a reader to its payload.
    ///
    /// `None` once the parent is exhausted. A child claiming more bytes than
    /// the parent has left is a size mismatch.
    fn next_box(&mut self) -> Result<Option<Source<'_, 'a>>> {
        let left = self.src.bytes_left();
        if left == 0 {
            return Ok(None);
        }
        let head = read_box_header(self.src, left)?;
        let payload = match head.size {
            BoxSize::Declared(size) => size - head.offset,
            BoxSize::ToEnd => left - head.offset,
        };
        if payload > self.src.bytes_left() {
            debug!("{head:?} needs {payload} bytes, {} left in parent", self.src.bytes_left());
            return Err(Error::StructuralSizeMismatch("box extends past the end of its parent"));
        }
        Ok(Some(BMFFBox {
            head,
            content: (&mut *self.src).take(payload),
        }))
    }
}

impl<T: Read + ?Sized> Read for BMFFBox<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Offset + ?Sized> Offset for BMFFBox<'_, T> {
    fn offset(&self) -> u64 {
        self.content.get_ref().offset()
    }
}

impl<T: ?Sized> BytesLeft for BMFFBox<'_, T> {
    fn bytes_left(&self) -> u64 {
        self.content.limit()
    }
}

impl<T: ?Sized> Drop for BMFFBox<'_, T> {
    fn drop(&mut self) {
        if self.content.limit() > 0 {
            let name: FourCC = From::from(self.head.name);
            debug!("Dropping {} bytes in '{}'", self.content.limit(), name);
        }
    }
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular box
/// and its length. Used internally for dispatching to specific
/// parsers for the internal content, or to get the length to
/// skip unknown or uninteresting boxes.
///
/// `left` is what the enclosing box (or file) still holds; a header that
/// doesn't fit, or a declared size smaller than the header, is a size mismatch.
///
/// See ISO 14496-12:2015 § 4.2
fn read_box_header<T: ReadBytesExt + Offset + ?Sized>(src: &mut T, left: u64) -> Result<BoxHeader> {
    if left < BoxHeader::MIN_SIZE {
        return Err(Error::StructuralSizeMismatch("trailing bytes too short for a box header"));
    }
    let start = src.offset();
    let size32 = be_u32(src)?;
    let name = BoxType::from(be_u32(src)?);
    let (size, mut offset) = match size32 {
        // Size=0 means box extends to the end of the enclosing box or file
        0 => (BoxSize::ToEnd, BoxHeader::MIN_SIZE),
        1 => {
            if left < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::StructuralSizeMismatch("largesize cut off by the enclosing box"));
            }
            let size64 = be_u64(src)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::StructuralSizeMismatch("malformed wide size"));
            }
            (BoxSize::Declared(size64), BoxHeader::MIN_LARGE_SIZE)
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::StructuralSizeMismatch("malformed size"));
            }
            (BoxSize::Declared(u64::from(size32)), BoxHeader::MIN_SIZE)
        },
    };
    let uuid = if name == BoxType::UuidBox {
        let available = match size {
            BoxSize::Declared(size) => size,
            BoxSize::ToEnd => left,
        };
        if available < offset + 16 {
            return Err(Error::StructuralSizeMismatch("uuid box too small for its extended type"));
        }
        let mut buffer = [0u8; 16];
        src.read_exact(&mut buffer)?;
        offset += 16;
        Some(ExtendedType(buffer))
    } else {
        None
    };
    Ok(BoxHeader { name, size, offset, start, uuid })
}

/// Parse the extra header fields for a full box.
fn read_fullbox_extra<T: ReadBytesExt + ?Sized>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags = src.read_u24::<byteorder::BigEndian>()?;
    Ok((version, flags))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_version_no_flags<T: ReadBytesExt + ?Sized>(src: &mut T, lenient: bool) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;

    if flags != 0 && !lenient {
        return Err(Error::Unsupported("expected flags to be 0"));
    }

    Ok(version)
}

/// Skip over the entire contents of a box.
fn skip_box_content<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    // Skip the contents of unknown chunks.
    let to_skip = src.bytes_left();
    debug!("{:?} (skipped {to_skip} bytes)", src.get_header());
    skip(src, to_skip)
}

/// Skip over the remain data of a box.
fn skip_box_remain<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    let remain = {
        let header = src.get_header();
        let len = src.bytes_left();
        if len > 0 {
            debug!("remain {len} (skipped) in {header:?}");
        }
        len
    };
    skip(src, remain)
}

/// State carried through one parse: the tree being built and the limits.
struct ParseContext<'a> {
    tree: BoxTree,
    tracker: ResourceTracker<'a>,
}

impl<'a> ParseContext<'a> {
    fn new(config: &'a ParseConfig) -> Self {
        Self { tree: BoxTree::new(), tracker: ResourceTracker::new(config) }
    }

    fn lenient(&self) -> bool {
        self.tracker.config().lenient
    }

    fn add_node(&mut self, head: BoxHeader, payload_len: u64, parent: Option<BoxId>) -> Result<BoxId> {
        let depth = parent.map_or(0, |p| self.tree.depth(p) + 1);
        self.tracker.add_box(depth)?;
        self.tree.push(head, payload_len, parent)
    }
}

/// Read a whole file into a box tree and return it with its 'meta' box.
///
/// Any structural error discards the partial tree.
pub(crate) fn read_box_tree(data: &[u8], config: &ParseConfig) -> Result<(BoxTree, BoxId)> {
    read_file(data, config).map_err(|e| match e {
        // Every read is bounded by its box, so running dry means a box
        // declared fewer bytes than its own fields need.
        Error::UnexpectedEOF => Error::StructuralSizeMismatch("box content shorter than its fields"),
        e => e,
    })
}

fn read_file(data: &[u8], config: &ParseConfig) -> Result<(BoxTree, BoxId)> {
    let mut cursor = std::io::Cursor::new(data);
    let mut f = OffsetReader::new(&mut cursor, data.len().to_u64());
    let mut ctx = ParseContext::new(config);
    let mut iter = BoxIter::new(&mut f);
    let mut meta = None;

    while let Some(mut b) = iter.next_box()? {
        // 'ftyp' box must occur first; see ISO 14496-12:2015 § 4.3.1
        if ctx.tree.is_empty() && b.head.name != BoxType::FileTypeBox {
            if !ctx.lenient() {
                return Err(Error::InvalidData("'ftyp' box must occur first"));
            }
            warn!("first box is {:?}, not 'ftyp'", b.head.name);
        }

        let id = read_box(&mut b, None, &mut ctx)?;

        if b.head.name == BoxType::MetadataBox {
            if meta.is_some() {
                return Err(Error::InvalidData("There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1"));
            }
            meta = Some(id);
        }
    }

    let meta = meta.ok_or(Error::MandatoryBoxMissing("meta"))?;
    Ok((ctx.tree, meta))
}

/// Read one box of any type and add it, with its children, to the tree.
///
/// Unknown types become opaque nodes; they never fail the parse.
fn read_box(src: &mut Source<'_, '_>, parent: Option<BoxId>, ctx: &mut ParseContext<'_>) -> Result<BoxId> {
    let id = ctx.add_node(src.head, src.bytes_left(), parent)?;
    let lenient = ctx.lenient();

    let name = src.head.name;
    let body = match name {
        BoxType::FileTypeBox => BoxBody::FileType(read_ftyp(src)?),
        BoxType::MetadataBox => read_meta(src, id, ctx)?,
        BoxType::HandlerBox => BoxBody::Handler(read_hdlr(src, lenient)?),
        BoxType::PrimaryItemBox => BoxBody::PrimaryItem(read_pitm(src, lenient)?),
        BoxType::ItemInfoBox => BoxBody::ItemInfo(read_iinf(src, id, ctx)?),
        BoxType::ItemInfoEntry => BoxBody::ItemInfoEntry(read_infe(src)?),
        BoxType::ItemLocationBox => BoxBody::ItemLocation(read_iloc(src, &ctx.tracker)?),
        BoxType::ItemPropertiesBox => read_iprp(src, id, ctx)?,
        BoxType::ItemPropertyContainerBox => read_ipco(src, id, ctx)?,
        BoxType::ItemPropertyAssociationBox => BoxBody::ItemPropertyAssociation(read_ipma(src, &ctx.tracker)?),
        BoxType::ItemReferenceBox => read_iref(src, id, ctx)?,
        BoxType::DataInformationBox => read_dinf(src, id, ctx)?,
        BoxType::DataReferenceBox => read_dref(src, id, ctx)?,
        BoxType::DataEntryUrlBox | BoxType::DataEntryUrnBox => BoxBody::DataEntry(read_data_entry(src)?),
        BoxType::ImageSpatialExtentsBox => read_property(src, lenient, read_ispe, BoxBody::ImageSpatialExtents)?,
        BoxType::ImageRotationBox => read_property(src, lenient, read_irot, BoxBody::ImageRotation)?,
        BoxType::ImageMirrorBox => read_property(src, lenient, read_imir, BoxBody::ImageMirror)?,
        BoxType::ColourInformationBox => read_property(src, lenient, read_colr, BoxBody::ColourInformation)?,
        BoxType::PixelInformationBox => read_property(src, lenient, read_pixi, BoxBody::PixelInformation)?,
        BoxType::AuxiliaryTypeProperty => read_property(src, lenient, read_auxc, BoxBody::AuxiliaryType)?,
        BoxType::MediaDataBox
        | BoxType::FreeBox
        | BoxType::SkipBox
        | BoxType::UuidBox
        | BoxType::ItemDataBox
        | BoxType::UnknownBox(_) => read_opaque(src, ctx.tracker.config().opaque_retain_limit)?,
    };
    ctx.tree.set_body(id, body);

    finish_box(src, lenient)?;
    Ok(id)
}

/// Close a box: everything it declared must have been read.
fn finish_box<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<()> {
    if lenient && src.bytes_left() > 0 {
        warn!("ignoring {} trailing bytes in {:?}", src.bytes_left(), src.head.name);
        skip_box_remain(src)?;
    }
    check_parser_state(&src.head, &src.content)
}

/// Read an item property box.
///
/// A property that fails validation becomes an opaque node so the items it
/// belongs to stay readable. Running out of bytes still fails the parse.
fn read_property<'a, T: Read + ?Sized, P>(
    src: &mut BMFFBox<'a, T>,
    lenient: bool,
    read: impl FnOnce(&mut BMFFBox<'a, T>, bool) -> Result<P>,
    body: impl FnOnce(P) -> BoxBody,
) -> Result<BoxBody> {
    match read(src, lenient) {
        Ok(property) => Ok(body(property)),
        Err(Error::InvalidData(reason) | Error::Unsupported(reason)) => {
            warn!("ignoring {:?} property: {reason}", src.head.name);
            skip_box_remain(src)?;
            Ok(BoxBody::Opaque(None))
        },
        Err(e) => Err(e),
    }
}

fn read_opaque<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, retain_limit: u64) -> Result<BoxBody> {
    if src.bytes_left() <= retain_limit {
        debug!("{:?} (kept unparsed)", src.get_header());
        Ok(BoxBody::Opaque(Some(src.read_into_try_vec()?)))
    } else {
        skip_box_content(src)?;
        Ok(BoxBody::Opaque(None))
    }
}

/// Parse a metadata box.
///
/// Children are read until fewer bytes than a box header remain; those are
/// alignment padding and skipped.
/// See ISO 14496-12:2015 § 8.11.1
fn read_meta(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let version = read_fullbox_version_no_flags(src, ctx.lenient())?;

    if version != 0 {
        return Err(Error::Unsupported("unsupported meta version"));
    }

    let mut iter = src.box_iter();
    while iter.bytes_left() >= BoxHeader::MIN_SIZE {
        let Some(mut b) = iter.next_box()? else { break };
        read_box(&mut b, Some(id), ctx)?;
    }

    let padding = src.bytes_left();
    if padding > 0 {
        debug!("skipping {padding} bytes of padding at the end of 'meta'");
        skip(src, padding)?;
    }

    for name in [
        BoxType::PrimaryItemBox,
        BoxType::ItemInfoBox,
        BoxType::ItemLocationBox,
        BoxType::ItemPropertiesBox,
        BoxType::ItemReferenceBox,
        BoxType::ItemDataBox,
        BoxType::DataInformationBox,
        BoxType::HandlerBox,
    ] {
        if ctx.tree.children(id).filter(|(_, n)| n.name() == name).count() > 1 {
            if !ctx.lenient() {
                return Err(Error::InvalidData("There should be zero or one of each of hdlr, pitm, iinf, iloc, iprp, iref, idat and dinf per ISO 14496-12:2015 § 8.11.1"));
            }
            warn!("more than one {name:?} box in 'meta', using the first");
        }
    }

    Ok(BoxBody::Meta)
}

/// Parse a Primary Item Box
/// See ISO 14496-12:2015 § 8.11.4
fn read_pitm<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src, lenient)?;

    let item_id = match version {
        0 => be_u16(src)?.into(),
        1 => be_u32(src)?,
        _ => return Err(Error::Unsupported("unsupported pitm version")),
    };

    Ok(item_id)
}

/// Parse a Handler Reference Box
/// See ISO 14496-12:2015 § 8.4.3
fn read_hdlr<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<HandlerBox> {
    let _version = read_fullbox_version_no_flags(src, lenient)?;
    let _pre_defined = be_u32(src)?;
    let handler_type = FourCC::from(be_u32(src)?);
    for _ in 0..3 {
        let _reserved = be_u32(src)?;
    }
    let name = read_string(src)?;
    // Some writers pad the name with extra NULs
    skip_box_remain(src)?;
    Ok(HandlerBox { handler_type, name })
}

/// Parse an Item Information Box
/// See ISO 14496-12:2015 § 8.11.6
fn read_iinf(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<ItemInfoBox> {
    let version = read_fullbox_version_no_flags(src, ctx.lenient())?;

    let entry_count = if version == 0 {
        be_u16(src)?.into()
    } else {
        be_u32(src)?
    };
    ctx.tracker.validate_item_count(entry_count)?;

    // Every entry is a box of at least 8 bytes
    let capacity = entry_count.to_usize().min(usize::try_from(src.bytes_left() / BoxHeader::MIN_SIZE)?);
    let mut item_ids = TryVec::with_capacity(capacity)?;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != BoxType::ItemInfoEntry {
            if !ctx.lenient() {
                return Err(Error::InvalidData("iinf box should contain only infe boxes"));
            }
            warn!("unexpected {:?} box in 'iinf'", b.head.name);
        }

        let child = read_box(&mut b, Some(id), ctx)?;
        if let BoxBody::ItemInfoEntry(infe) = ctx.tree.node(child).body() {
            item_ids.push(infe.item_id)?;
        }
    }

    if item_ids.len() != entry_count.to_usize() {
        warn!("iinf declares {entry_count} entries but holds {}", item_ids.len());
    }

    item_ids.sort_unstable();
    if item_ids.windows(2).any(|pair| pair[0] == pair[1]) {
        if !ctx.lenient() {
            return Err(Error::InvalidData("item_ID must be unique within iinf per ISO 14496-12:2015 § 8.11.6.1"));
        }
        warn!("duplicate item_ID in 'iinf'");
    }

    Ok(ItemInfoBox { version, entry_count })
}

/// Parse an Item Info Entry
/// See ISO 14496-12:2015 § 8.11.6.2
fn read_infe<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<ItemInfoEntry> {
    // According to the standard, it seems the flags field should be 0, but
    // at least one sample AVIF image has a nonzero value.
    let (version, flags) = read_fullbox_extra(src)?;

    let entry = match version {
        0 | 1 => {
            let item_id = be_u16(src)?.into();
            let item_protection_index = be_u16(src)?;
            let item_name = read_string(src)?;
            let content_type = read_optional_string(src)?;
            let content_encoding = read_optional_string(src)?;
            // The extension follows the third NUL, i.e. the content encoding
            let extension_type = if version == 1 && content_encoding.is_some() && src.bytes_left() >= 4 {
                Some(FourCC::from(be_u32(src)?))
            } else {
                None
            };
            ItemInfoEntry {
                version,
                flags,
                item_id,
                item_protection_index,
                item_type: None,
                item_name,
                content_type,
                content_encoding,
                item_uri_type: None,
                extension_type,
            }
        },
        _ => {
            let item_id = if version == 2 {
                be_u16(src)?.into()
            } else {
                be_u32(src)?
            };
            let item_protection_index = be_u16(src)?;
            let item_type = FourCC::from(be_u32(src)?);
            let item_name = read_string(src)?;

            let mut content_type = None;
            let mut content_encoding = None;
            let mut item_uri_type = None;
            match &item_type.value {
                b"mime" => {
                    content_type = Some(read_string(src)?);
                    content_encoding = read_optional_string(src)?;
                },
                b"uri " => item_uri_type = Some(read_string(src)?),
                _ => {},
            }

            ItemInfoEntry {
                version,
                flags,
                item_id,
                item_protection_index,
                item_type: Some(item_type),
                item_name,
                content_type,
                content_encoding,
                item_uri_type,
                extension_type: None,
            }
        },
    };
    debug!("infe item_id {} item_type: {:?} name: {:?}", entry.item_id, entry.item_type, entry.name_lossy());

    // There may be extension data here, but it's not of interest to us
    skip_box_remain(src)?;

    Ok(entry)
}

/// Read a NUL-terminated string. A missing terminator at the end of the box is tolerated.
fn read_string<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<TryString> {
    let mut s = TryVec::new();
    while src.bytes_left() > 0 {
        match src.read_u8()? {
            0 => break,
            b => s.push(b)?,
        }
    }
    Ok(s)
}

fn read_optional_string<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<Option<TryString>> {
    if src.bytes_left() == 0 {
        return Ok(None);
    }
    read_string(src).map(Some)
}

/// Parse an Item Reference Box.
///
/// Every child is a reference of the type given by its box type; its item IDs
/// are 16 or 32 bits depending on the version of this box.
/// See ISO 14496-12:2015 § 8.11.12
fn read_iref(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let version = read_fullbox_version_no_flags(src, ctx.lenient())?;
    if version > 1 {
        return Err(Error::Unsupported("iref version"));
    }

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        let child = ctx.add_node(b.head, b.bytes_left(), Some(id))?;
        let reference = read_single_item_reference(&mut b, version)?;
        ctx.tree.set_body(child, BoxBody::ItemReferenceType(reference));
        finish_box(&mut b, ctx.lenient())?;
    }
    Ok(BoxBody::ItemReference { version })
}

fn read_single_item_reference<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, version: u8) -> Result<SingleItemTypeReferenceBox> {
    let from_item_id = if version == 0 {
        be_u16(src)?.into()
    } else {
        be_u32(src)?
    };
    let reference_count = be_u16(src)?;
    let mut to_item_ids = TryVec::with_capacity(reference_count.to_usize())?;
    for _ in 0..reference_count {
        let to_item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        to_item_ids.push(to_item_id)?;
    }
    Ok(SingleItemTypeReferenceBox {
        reference_type: src.head.name.into(),
        from_item_id,
        to_item_ids,
    })
}

/// Parse an Item Properties Box.
///
/// 'ipco' must come first; the rest are 'ipma' boxes.
/// See ISO 23008-12:2017 § 9.3.1
fn read_iprp(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let mut iter = src.box_iter();

    match iter.next_box()? {
        Some(mut b) if b.head.name == BoxType::ItemPropertyContainerBox => {
            read_box(&mut b, Some(id), ctx)?;
        },
        _ => return Err(Error::MandatoryBoxMissing("ipco")),
    }

    let mut association_boxes = 0;
    while let Some(mut b) = iter.next_box()? {
        if b.head.name == BoxType::ItemPropertyAssociationBox {
            association_boxes += 1;
        } else {
            if !ctx.lenient() {
                return Err(Error::InvalidData("unexpected iprp child"));
            }
            warn!("unexpected {:?} box in 'iprp'", b.head.name);
        }
        read_box(&mut b, Some(id), ctx)?;
    }

    if association_boxes == 0 {
        warn!("'iprp' has no 'ipma' box, no item has properties");
    }
    Ok(BoxBody::ItemProperties)
}

fn read_ipco(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let mut iter = src.box_iter();
    let mut count = 0;
    while let Some(mut b) = iter.next_box()? {
        // Every property gets a node, known or not, to keep the indices right
        count += 1;
        ctx.tracker.validate_property_count(count)?;
        let property = read_box(&mut b, Some(id), ctx)?;
        if ctx.tree.node(property).is_opaque() {
            debug!("property {count} is unsupported {:?}", b.head.name);
        }
    }
    Ok(BoxBody::ItemPropertyContainer)
}

fn read_ipma<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, tracker: &ResourceTracker<'_>) -> Result<ItemPropertyAssociationBox> {
    let (version, flags) = read_fullbox_extra(src)?;

    let entry_count = be_u32(src)?;
    tracker.validate_item_count(entry_count)?;

    // Every entry has at least a 16-bit item ID and an 8-bit count
    let capacity = entry_count.to_usize().min(usize::try_from(src.bytes_left() / 3)?);
    let mut entries = TryVec::with_capacity(capacity)?;

    let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
    for _ in 0..entry_count {
        let item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        let association_count = src.read_u8()?;
        let mut associations = TryVec::with_capacity(association_count.to_usize())?;
        for _ in 0..association_count {
            let association = &mut [0; 2][..num_association_bytes];
            src.read_exact(association)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u16(association.remaining().try_into()?)?;
            associations.push(PropertyAssociation { essential, property_index })?;
        }
        entries.push(ItemPropertyAssociation { item_id, associations })?;
    }

    Ok(ItemPropertyAssociationBox { version, flags, entries })
}

/// Parse a Pixel Information property box
/// See ISO/IEC 23008-12:2017 § 6.5.6
fn read_pixi<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<PixelInformation> {
    if read_fullbox_version_no_flags(src, lenient)? != 0 {
        return Err(Error::Unsupported("unsupported pixi version"));
    }

    let channel_count = src.read_u8()?;
    let mut bits_per_channel = ArrayVec::<u8, 16>::new();
    for _ in 0..channel_count {
        let bits = src.read_u8()?;
        bits_per_channel.try_push(bits).map_err(|_| Error::Unsupported("pixi declares more than 16 channels"))?;
    }

    Ok(PixelInformation { bits_per_channel })
}

/// Parse an Auxiliary Type property box
/// See ISO/IEC 23008-12:2017 § 6.5.8
fn read_auxc<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<AuxiliaryTypeProperty> {
    if read_fullbox_version_no_flags(src, lenient)? != 0 {
        return Err(Error::Unsupported("unsupported auxC version"));
    }

    let auxc = AuxiliaryTypeProperty { aux_data: src.read_into_try_vec()? };
    debug!("auxC type '{}'", std::string::String::from_utf8_lossy(auxc.aux_type()));
    Ok(auxc)
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<ImageSpatialExtents> {
    let _version = read_fullbox_version_no_flags(src, lenient)?;
    // Version is always 0 for ispe

    let width = be_u32(src)?;
    let height = be_u32(src)?;

    // Validate dimensions are non-zero (0×0 images are invalid)
    if (width == 0 || height == 0) && !lenient {
        return Err(Error::InvalidData("ispe dimensions cannot be zero"));
    }

    Ok(ImageSpatialExtents { width, height })
}

/// Parse an Image Rotation property box
/// See ISO/IEC 23008-12:2017 § 6.5.10
fn read_irot<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<ImageRotation> {
    let byte = [src.read_u8()?];
    let mut bits = BitReader::new(&byte);
    let reserved = bits.read_u8(6)?;
    let angle = bits.read_u8(2)?;
    if reserved != 0 && !lenient {
        return Err(Error::InvalidData("invalid reserved bits in irot"));
    }
    Ok(ImageRotation { angle })
}

/// Parse an Image Mirroring property box
/// See ISO/IEC 23008-12:2017 § 6.5.12
fn read_imir<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<ImageMirror> {
    let byte = [src.read_u8()?];
    let mut bits = BitReader::new(&byte);
    let reserved = bits.read_u8(7)?;
    let axis = bits.read_u8(1)?;
    if reserved != 0 && !lenient {
        return Err(Error::InvalidData("invalid reserved bits in imir"));
    }
    Ok(ImageMirror { axis })
}

/// Parse a Colour Information box
/// See ISO 14496-12:2015 § 12.1.5
fn read_colr<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, lenient: bool) -> Result<ColourInformation> {
    let colour_type = FourCC::from(be_u32(src)?);
    match &colour_type.value {
        b"nclx" => {
            let colour_primaries = be_u16(src)?;
            let transfer_characteristics = be_u16(src)?;
            let matrix_coefficients = be_u16(src)?;
            let byte = [src.read_u8()?];
            let mut bits = BitReader::new(&byte);
            let full_range = bits.read_bool()?;
            if bits.read_u8(7)? != 0 && !lenient {
                return Err(Error::InvalidData("colr box contains invalid reserved bits"));
            }
            Ok(ColourInformation::Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range,
            })
        },
        b"rICC" | b"prof" => {
            let icc = src.read_into_try_vec()?;
            if icc.is_empty() {
                return Err(Error::InvalidData("colr box contains an empty ICC profile"));
            }
            Ok(ColourInformation::Icc(icc))
        },
        _ => {
            skip_box_remain(src)?;
            Ok(ColourInformation::Unknown(colour_type))
        },
    }
}

/// Potential sizes (in bytes) of variable-sized fields of the 'iloc' box
/// See ISO 14496-12:2015 § 8.11.3
///
/// Only {0, 4, 8} are current; 1 and 2 are accepted for older files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IlocFieldSize {
    Zero,
    One,
    Two,
    Four,
    Eight,
}

impl IlocFieldSize {
    const fn to_bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 8,
            Self::Two => 16,
            Self::Four => 32,
            Self::Eight => 64,
        }
    }

    const fn to_bytes(self) -> u8 {
        self.to_bits() / 8
    }
}

impl TryFrom<u8> for IlocFieldSize {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(Error::InvalidSizeSelector(value)),
        }
    }
}

#[derive(PartialEq)]
enum IlocVersion {
    Zero,
    One,
    Two,
}

impl TryFrom<u8> for IlocVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(Error::Unsupported("unsupported version in 'iloc' box")),
        }
    }
}

/// Read a big-endian value whose width is given by an 'iloc' size field.
/// A zero-sized field reads as 0.
fn read_sized(iloc: &mut BitReader<'_>, size: IlocFieldSize) -> Result<u64> {
    Ok(iloc.read_u64(size.to_bits())?)
}

/// Parse an item location box inside a meta box
/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>, tracker: &ResourceTracker<'_>) -> Result<ItemLocationBox> {
    let lenient = tracker.config().lenient;
    let raw_version = read_fullbox_version_no_flags(src, lenient)?;
    let version: IlocVersion = raw_version.try_into()?;

    let iloc = src.read_into_try_vec()?;
    let mut iloc = BitReader::new(&iloc);

    let offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let length_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let base_offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;

    let index_size: Option<IlocFieldSize> = match version {
        IlocVersion::One | IlocVersion::Two => Some(iloc.read_u8(4)?.try_into()?),
        IlocVersion::Zero => {
            let _reserved = iloc.read_u8(4)?;
            None
        },
    };

    let item_count = match version {
        IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
        IlocVersion::Two => iloc.read_u32(32)?,
    };
    tracker.validate_item_count(item_count)?;

    // An item takes at least 6 bytes: 16-bit ID, reference index and extent count
    let capacity = item_count.to_usize().min(usize::try_from(iloc.remaining() / 48)?);
    let mut items = TryVec::with_capacity(capacity)?;

    for _ in 0..item_count {
        let item_id = match version {
            IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
            IlocVersion::Two => iloc.read_u32(32)?,
        };

        // ISO 14496-12 isn't entirely clear how an `iloc` should be interpreted for version 0,
        // which has no `construction_method` field. It does say:
        // "For maximum compatibility, version 0 of this box should be used in preference to
        //  version 1 with `construction_method==0`, or version 2 when possible."
        // We take this to imply version 0 can be interpreted as using file offsets.
        let construction_method = match version {
            IlocVersion::Zero => ConstructionMethod::File,
            IlocVersion::One | IlocVersion::Two => {
                // 4 reserved bits, then a 12-bit construction_method
                let _reserved = iloc.read_u16(4)?;
                let method = ConstructionMethod::from(iloc.read_u16(12)?);
                if let ConstructionMethod::Other(value) = method {
                    warn!("item {item_id} has construction_method {value}, not in the set 0, 1 or 2");
                }
                method
            },
        };

        let data_reference_index = iloc.read_u16(16)?;

        if data_reference_index != 0 {
            warn!("item {item_id} is stored in external data reference {data_reference_index}, its location won't resolve");
        }

        let base_offset = read_sized(&mut iloc, base_offset_size)?;
        let extent_count = iloc.read_u16(16)?;

        if extent_count < 1 && !lenient {
            return Err(Error::InvalidData("extent_count must have a value 1 or greater per ISO 14496-12:2015 § 8.11.3.3"));
        }
        tracker.validate_extent_count(extent_count)?;

        let mut extents = TryVec::with_capacity(extent_count.to_usize())?;

        for _ in 0..extent_count {
            let index = match index_size {
                Some(index_size) => read_sized(&mut iloc, index_size)?,
                None => 0,
            };

            // Per ISO 14496-12:2015 § 8.11.3.1:
            // "If the offset is not identified (the field has a length of zero), then the
            //  beginning of the source (offset 0) is implied"
            // This behavior will follow from BitReader::read_u64(0) -> 0.
            let offset = read_sized(&mut iloc, offset_size)?;
            let length = read_sized(&mut iloc, length_size)?;

            extents.push(ItemLocationExtent { index, offset, length, base_offset })?;
        }

        items.push(ItemLocationEntry {
            item_id,
            construction_method,
            data_reference_index,
            base_offset,
            extents,
        })?;
    }

    if iloc.remaining() != 0 {
        return Err(Error::StructuralSizeMismatch("invalid iloc size"));
    }

    Ok(ItemLocationBox {
        version: raw_version,
        offset_size: offset_size.to_bytes(),
        length_size: length_size.to_bytes(),
        base_offset_size: base_offset_size.to_bytes(),
        index_size: index_size.map_or(0, IlocFieldSize::to_bytes),
        items,
    })
}

/// Parse a Data Information Box; its only expected child is 'dref'.
/// See ISO 14496-12:2015 § 8.7.1
fn read_dinf(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        read_box(&mut b, Some(id), ctx)?;
    }
    Ok(BoxBody::DataInformation)
}

/// Parse a Data Reference Box
/// See ISO 14496-12:2015 § 8.7.2
fn read_dref(src: &mut Source<'_, '_>, id: BoxId, ctx: &mut ParseContext<'_>) -> Result<BoxBody> {
    let _version = read_fullbox_version_no_flags(src, ctx.lenient())?;
    let entry_count = be_u32(src)?;
    ctx.tracker.validate_item_count(entry_count)?;

    let mut entries = 0u32;
    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        read_box(&mut b, Some(id), ctx)?;
        entries = entries.saturating_add(1);
    }
    if entries != entry_count {
        warn!("dref declares {entry_count} entries but holds {entries}");
    }
    Ok(BoxBody::DataReference { entry_count })
}

/// Parse a 'url ' or 'urn ' data entry.
///
/// A self-contained entry has no location, whatever bytes follow its header.
fn read_data_entry<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<DataEntryBox> {
    let (_version, flags) = read_fullbox_extra(src)?;
    let mut entry = DataEntryBox {
        entry_type: src.head.name.into(),
        flags,
        name: None,
        location: TryVec::new(),
    };

    if src.head.name == BoxType::DataEntryUrnBox && src.bytes_left() > 0 {
        entry.name = Some(read_string(src)?);
    }
    if !entry.is_self_contained() && src.bytes_left() > 0 {
        entry.location = read_string(src)?;
    }

    skip_box_remain(src)?;
    Ok(entry)
}

/// Parse an ftyp box.
/// See ISO 14496-12:2015 § 4.3
fn read_ftyp<T: Read + ?Sized>(src: &mut BMFFBox<'_, T>) -> Result<FileTypeBox> {
    let major = be_u32(src)?;
    let minor = be_u32(src)?;
    let bytes_left = src.remaining()?;
    if bytes_left % 4 != 0 {
        return Err(Error::InvalidData("invalid ftyp size"));
    }
    // Is a brand_count of zero valid?
    let brand_count = bytes_left / 4;
    let mut brands = TryVec::with_capacity(brand_count.try_into()?)?;
    for _ in 0..brand_count {
        brands.push(be_u32(src)?.into())?;
    }
    Ok(FileTypeBox {
        major_brand: From::from(major),
        minor_version: minor,
        compatible_brands: brands,
    })
}

fn check_parser_state<T: ?Sized>(header: &BoxHeader, left: &Take<&mut T>) -> Result<(), Error> {
    let limit = left.limit();
    if limit == 0 {
        Ok(())
    } else {
        debug!("{limit} bytes left unread in {header:?}");
        Err(Error::StructuralSizeMismatch("unread box content or bad parser sync"))
    }
}

/// Skip a number of bytes that we don't care to parse.
fn skip<T: Read + ?Sized>(src: &mut T, bytes: u64) -> Result<()> {
    std::io::copy(&mut src.take(bytes), &mut std::io::sink())?;
    Ok(())
}

fn be_u16<T: ReadBytesExt + ?Sized>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u32<T: ReadBytesExt + ?Sized>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u64<T: ReadBytesExt + ?Sized>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::BigEndian>().map_err(From::from)
}

#[test]
fn header_size_zero_extends_to_end() {
    let data = [0u8, 0, 0, 0, b'm', b'd', b'a', b't', 1, 2, 3];
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut f = OffsetReader::new(&mut cursor, data.len().to_u64());
    let mut iter = BoxIter::new(&mut f);
    let b = iter.next_box().unwrap().unwrap();
    assert!(b.head.extends_to_end());
    assert_eq!(b.bytes_left(), 3);
    assert!(b.remaining().is_err());
    assert!(b.head.payload_size().is_err());
}

#[test]
fn header_large_size() {
    let mut data = std::vec::Vec::new();
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(&0x1_0000_0000u64.to_be_bytes());
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut f = OffsetReader::new(&mut cursor, u64::MAX);
    let head = read_box_header(&mut f, u64::MAX).unwrap();
    assert_eq!(head.size(), BoxSize::Declared(0x1_0000_0000));
    assert_eq!(head.header_len(), 16);
    assert_eq!(head.payload_size().unwrap(), 0x1_0000_0000 - 16);
}

#[test]
fn header_uuid_extended_type() {
    let mut data = std::vec::Vec::new();
    data.extend_from_slice(&24u32.to_be_bytes());
    data.extend_from_slice(b"uuid");
    data.extend_from_slice(&[0xab; 16]);
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut f = OffsetReader::new(&mut cursor, 24);
    let head = read_box_header(&mut f, 24).unwrap();
    assert_eq!(head.header_len(), 24);
    assert_eq!(head.extended_type().unwrap().to_string(), "ab".repeat(16));
}

#[test]
fn header_size_smaller_than_header() {
    let data = [0u8, 0, 0, 4, b'f', b'r', b'e', b'e'];
    let mut cursor = std::io::Cursor::new(&data[..]);
    let mut f = OffsetReader::new(&mut cursor, 8);
    assert!(matches!(read_box_header(&mut f, 8), Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn iloc_size_selector() {
    assert_eq!(IlocFieldSize::try_from(2).unwrap(), IlocFieldSize::Two);
    assert!(matches!(IlocFieldSize::try_from(3), Err(Error::InvalidSizeSelector(3))));
    assert!(matches!(IlocFieldSize::try_from(16), Err(Error::InvalidSizeSelector(16))));
}

#[test]
fn iloc_version_0_has_no_construction_method() {
    #[rustfmt::skip]
    let payload = [
        0, 0, 0, 0,         // version 0, flags
        0x44, 0x00,         // offset_size 4, length_size 4, base_offset_size 0, reserved
        0, 2,               // item_count
        0, 1,   0, 0,   0, 1,   0, 0, 0, 10,   0, 0, 0, 20, // item 1
        0, 2,   0, 0,   0, 1,   0, 0, 0, 30,   0, 0, 0, 40, // item 2
    ];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let iloc = read_iloc(&mut test_box(BoxType::ItemLocationBox, &mut data), &tracker).unwrap();
    assert_eq!(iloc.items.len(), 2);
    assert_eq!(iloc.items[1].item_id, 2);
    assert_eq!(iloc.items[1].construction_method, ConstructionMethod::File);
    assert_eq!(iloc.items[1].extents[0].offset, 30);
    assert_eq!(iloc.items[1].extents[0].length, 40);
}

#[test]
fn iloc_version_2_wide_ids_and_construction_method() {
    #[rustfmt::skip]
    let payload = [
        2, 0, 0, 0,         // version 2, flags
        0x44, 0x40,         // offset_size 4, length_size 4, base_offset_size 4, index_size 0
        0, 0, 0, 2,         // item_count
        0, 1, 0, 0,   0, 0,   0, 0,   0, 0, 0, 0,   0, 1,   0, 0, 0, 10,   0, 0, 0, 20,
        0, 1, 0, 1,   0, 0,   0, 0,   0, 0, 0, 100, 0, 1,   0, 0, 0, 30,   0, 0, 0, 40,
    ];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let iloc = read_iloc(&mut test_box(BoxType::ItemLocationBox, &mut data), &tracker).unwrap();
    assert_eq!(iloc.version, 2);
    assert_eq!(iloc.items[0].item_id, 0x1_0000);
    assert_eq!(iloc.items[1].item_id, 0x1_0001);
    assert_eq!(iloc.items[1].base_offset, 100);
    assert_eq!(iloc.items[1].extents[0].absolute_offset(), Some(130));
}

#[test]
fn iloc_construction_method_is_low_12_bits() {
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    for (field, expected) in [
        (0x0001u16, ConstructionMethod::Idat),
        (0xF000, ConstructionMethod::File),
        (0x0010, ConstructionMethod::Other(0x10)),
        (0x0003, ConstructionMethod::Other(3)),
    ] {
        let [hi, lo] = field.to_be_bytes();
        #[rustfmt::skip]
        let payload = [
            1, 0, 0, 0,
            0x44, 0x00,
            0, 1,
            0, 7,   hi, lo,   0, 0,   0, 1,   0, 0, 0, 0,   0, 0, 0, 4,
        ];
        let mut data = &payload[..];
        let iloc = read_iloc(&mut test_box(BoxType::ItemLocationBox, &mut data), &tracker).unwrap();
        assert_eq!(iloc.items[0].construction_method, expected, "field {field:#06x}");
    }
}

#[test]
fn iloc_version_1_reads_extent_index() {
    #[rustfmt::skip]
    let payload = [
        1, 0, 0, 0,
        0x44, 0x02,         // offset_size 4, length_size 4, base_offset_size 0, index_size 2
        0, 1,
        0, 3,   0, 0,   0, 0,   0, 2,
        0, 1,   0, 0, 0, 10,   0, 0, 0, 20,
        0, 2,   0, 0, 0, 30,   0, 0, 0, 40,
    ];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let iloc = read_iloc(&mut test_box(BoxType::ItemLocationBox, &mut data), &tracker).unwrap();
    assert_eq!(iloc.index_size, 2);
    let extents = &iloc.items[0].extents;
    assert_eq!((extents[0].index, extents[0].offset, extents[0].length), (1, 10, 20));
    assert_eq!((extents[1].index, extents[1].offset, extents[1].length), (2, 30, 40));
}

#[test]
fn iloc_trailing_bytes() {
    let payload = [0, 0, 0, 0, 0x44, 0x00, 0, 0, 0xff];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let result = read_iloc(&mut test_box(BoxType::ItemLocationBox, &mut data), &tracker);
    assert!(matches!(result, Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn infe_version_1_extension_type() {
    let mut payload = std::vec::Vec::new();
    payload.extend_from_slice(&[1, 0, 0, 0, 0, 5, 0, 0]);
    payload.extend_from_slice(b"Exif\0application/octet-stream\0\0fdel");
    let mut data = &payload[..];
    let infe = read_infe(&mut test_box(BoxType::ItemInfoEntry, &mut data)).unwrap();
    assert_eq!(infe.item_id, 5);
    assert!(infe.item_type.is_none());
    assert!(infe.is_exif());
    assert_eq!(infe.content_type.as_deref(), Some(&b"application/octet-stream"[..]));
    assert_eq!(infe.content_encoding.as_deref(), Some(&b""[..]));
    assert_eq!(infe.extension_type, Some(FourCC::from(b"fdel")));
}

#[test]
fn infe_version_3_mime() {
    let mut payload = std::vec::Vec::new();
    payload.extend_from_slice(&[3, 0, 0, 1, 0, 1, 0, 0, 0, 0]);
    payload.extend_from_slice(b"mimeXMP\0application/rdf+xml\0");
    let mut data = &payload[..];
    let infe = read_infe(&mut test_box(BoxType::ItemInfoEntry, &mut data)).unwrap();
    assert_eq!(infe.item_id, 0x1_0000);
    assert_eq!(infe.flags, 1);
    assert_eq!(infe.item_type, Some(FourCC::from(b"mime")));
    assert!(!infe.is_exif());
    assert_eq!(infe.content_type.as_deref(), Some(&b"application/rdf+xml"[..]));
    assert!(infe.content_encoding.is_none());
}

#[test]
fn infe_version_0_has_no_extension() {
    let payload = b"\0\0\0\0\0\x09\0\0thumbnail\0image/jpeg\0\0fdel";
    let mut data = &payload[..];
    let infe = read_infe(&mut test_box(BoxType::ItemInfoEntry, &mut data)).unwrap();
    assert_eq!(infe.version, 0);
    assert_eq!(infe.item_id, 9);
    assert_eq!(&infe.item_name[..], b"thumbnail");
    assert_eq!(infe.content_type.as_deref(), Some(&b"image/jpeg"[..]));
    assert!(infe.extension_type.is_none());
    assert!(!infe.is_exif());
}

#[test]
fn infe_version_2_uri() {
    let payload = b"\x02\0\0\0\0\x04\0\0uri \0urn:example:meta\0";
    let mut data = &payload[..];
    let infe = read_infe(&mut test_box(BoxType::ItemInfoEntry, &mut data)).unwrap();
    assert_eq!(infe.item_id, 4);
    assert_eq!(infe.item_type, Some(FourCC::from(b"uri ")));
    assert!(infe.item_name.is_empty());
    assert_eq!(infe.item_uri_type.as_deref(), Some(&b"urn:example:meta"[..]));
    assert!(infe.content_type.is_none());
}

#[test]
fn data_entry_self_contained_has_no_location() {
    let payload = [0, 0, 0, 1, b'f', b'i', b'l', b'e', 0];
    let mut data = &payload[..];
    let entry = read_data_entry(&mut test_box(BoxType::DataEntryUrlBox, &mut data)).unwrap();
    assert!(entry.is_self_contained());
    assert!(entry.location.is_empty());
}

#[test]
fn data_entry_urn_name_and_location() {
    let payload = b"\0\0\0\0urn:x\0http://example.com/a\0";
    let mut data = &payload[..];
    let entry = read_data_entry(&mut test_box(BoxType::DataEntryUrnBox, &mut data)).unwrap();
    assert!(!entry.is_self_contained());
    assert_eq!(entry.name.as_deref(), Some(&b"urn:x"[..]));
    assert_eq!(&entry.location[..], b"http://example.com/a");
}

#[test]
fn ipma_two_byte_associations() {
    #[rustfmt::skip]
    let payload = [
        0, 0, 0, 1,          // version 0, flags: 2-byte associations
        0, 0, 0, 1,          // entry_count
        0, 7, 2,             // item 7, two associations
        0x80, 0x03,          // essential, index 3
        0x01, 0x00,          // index 256
    ];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let ipma = read_ipma(&mut test_box(BoxType::ItemPropertyAssociationBox, &mut data), &tracker).unwrap();
    let entry = &ipma.entries[0];
    assert_eq!(entry.item_id, 7);
    assert_eq!(entry.associations[0], PropertyAssociation { essential: true, property_index: 3 });
    assert_eq!(entry.associations[1], PropertyAssociation { essential: false, property_index: 256 });
}

#[test]
fn ipma_version_1_wide_item_ids() {
    #[rustfmt::skip]
    let payload = [
        1, 0, 0, 0,          // version 1, flags: 1-byte associations
        0, 0, 0, 1,
        0, 1, 0, 2, 1,       // item 0x10002, one association
        0x82,                // essential, index 2
    ];
    let config = ParseConfig::default();
    let tracker = ResourceTracker::new(&config);
    let mut data = &payload[..];
    let ipma = read_ipma(&mut test_box(BoxType::ItemPropertyAssociationBox, &mut data), &tracker).unwrap();
    assert_eq!(ipma.entries[0].item_id, 0x1_0002);
    assert_eq!(ipma.entries[0].associations[0], PropertyAssociation { essential: true, property_index: 2 });
}

#[test]
fn irot_and_imir() {
    let mut data = &[0b0000_0011u8][..];
    assert_eq!(read_irot(&mut test_box(BoxType::ImageRotationBox, &mut data), false).unwrap().degrees(), 270);
    let mut data = &[0b1000_0001u8][..];
    assert!(read_imir(&mut test_box(BoxType::ImageMirrorBox, &mut data), false).is_err());
    let mut data = &[0b1000_0001u8][..];
    assert_eq!(read_imir(&mut test_box(BoxType::ImageMirrorBox, &mut data), true).unwrap().axis, 1);
}

#[test]
fn colr_nclx() {
    let payload = [b'n', b'c', b'l', b'x', 0, 1, 0, 13, 0, 6, 0x80];
    let mut data = &payload[..];
    let colr = read_colr(&mut test_box(BoxType::ColourInformationBox, &mut data), false).unwrap();
    assert_eq!(colr, ColourInformation::Nclx {
        colour_primaries: 1,
        transfer_characteristics: 13,
        matrix_coefficients: 6,
        full_range: true,
    });
}

#[test]
fn pixi_channels() {
    let payload = [0, 0, 0, 0, 3, 8, 8, 8];
    let mut data = &payload[..];
    let pixi = read_pixi(&mut test_box(BoxType::PixelInformationBox, &mut data), false).unwrap();
    assert_eq!(&pixi.bits_per_channel[..], &[8, 8, 8]);
}

#[test]
fn pixi_too_many_channels() {
    let mut payload = std::vec![0u8, 0, 0, 0, 17];
    payload.extend_from_slice(&[8; 17]);
    let mut data = &payload[..];
    let result = read_pixi(&mut test_box(BoxType::PixelInformationBox, &mut data), false);
    assert!(matches!(result, Err(Error::Unsupported(_))));
}

#[test]
fn auxc_type_and_subtype() {
    let payload = b"\0\0\0\0urn:mpeg:hevc:2015:auxid:1\0\x01\x02";
    let mut data = &payload[..];
    let auxc = read_auxc(&mut test_box(BoxType::AuxiliaryTypeProperty, &mut data), false).unwrap();
    assert_eq!(auxc.aux_type(), b"urn:mpeg:hevc:2015:auxid:1");
    assert_eq!(auxc.aux_subtype(), &[1, 2]);
}
