//! Loading of raw metadata images from PE files or bare metadata roots.

use std::{ops::Range, path::Path};

use strum::{EnumCount, IntoEnumIterator};
use tracing::debug;

use crate::{
    file::{
        io::{read_le_at, read_le_at_dyn},
        ImageBytes,
    },
    metadata::{
        raw::{
            heaps::{Blob, Strings},
            schema::{table_columns, TableInfo},
        },
        token::TableId,
    },
    Result,
};

/// Signature of a metadata root, "BSJB".
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Where one table's rows live inside the image bytes.
#[derive(Debug, Clone, Copy, Default)]
struct TableLocation {
    offset: usize,
    row_size: usize,
}

/// A parsed, read-only view of one image's metadata tables and heaps.
///
/// Only structure is decoded up front; rows are read on demand through [`RawImage::column`] and the
/// typed accessors in [`crate::metadata::raw::rows`].
#[derive(Debug)]
pub struct RawImage {
    bytes: ImageBytes,
    version: String,
    strings: Range<usize>,
    blobs: Range<usize>,
    guids: Range<usize>,
    user_strings: Range<usize>,
    info: TableInfo,
    tables: [TableLocation; TableId::COUNT],
    sorted: u64,
}

impl RawImage {
    /// Parses either a PE image or a bare metadata root.
    pub fn parse(bytes: impl Into<ImageBytes>) -> Result<RawImage> {
        let bytes = bytes.into();
        let data = bytes.data();
        if data.len() < 4 {
            return Err(malformed_error!("Image too small - {} bytes", data.len()));
        }

        let (root, size) = if data.starts_with(b"MZ") {
            locate_pe_metadata(data)?
        } else {
            (0, data.len())
        };

        Self::from_root(bytes, root, size)
    }

    /// Memory-maps and parses a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<RawImage> {
        Self::parse(ImageBytes::map(path)?)
    }

    fn from_root(bytes: ImageBytes, root: usize, size: usize) -> Result<RawImage> {
        let data = bytes.data_slice(root, size)?;

        let mut offset = 0;
        let signature = read_le_at::<u32>(data, &mut offset)?;
        if signature != METADATA_SIGNATURE {
            return Err(malformed_error!(
                "Invalid metadata signature - 0x{:08x}",
                signature
            ));
        }

        offset += 2 + 2 + 4;
        let version_length = read_le_at::<u32>(data, &mut offset)? as usize;
        let version_bytes = data
            .get(offset..offset + version_length)
            .ok_or_else(|| out_of_bounds_error!())?;
        let version = String::from_utf8_lossy(version_bytes)
            .trim_end_matches('\0')
            .to_string();
        offset += version_length;

        offset += 2;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;

        let mut tables_stream = None;
        let mut strings = 0..0;
        let mut blobs = 0..0;
        let mut guids = 0..0;
        let mut user_strings = 0..0;

        for _ in 0..stream_count {
            let stream_offset = read_le_at::<u32>(data, &mut offset)? as usize;
            let stream_size = read_le_at::<u32>(data, &mut offset)? as usize;

            let name_start = offset;
            let name_end = data[name_start..]
                .iter()
                .take(32)
                .position(|b| *b == 0)
                .map(|p| name_start + p)
                .ok_or_else(|| malformed_error!("Unterminated stream name"))?;
            let name = std::str::from_utf8(&data[name_start..name_end])
                .map_err(|_| malformed_error!("Invalid stream name"))?;
            offset = name_start + ((name_end - name_start) / 4 + 1) * 4;

            if stream_offset >= size || stream_offset + stream_size > size {
                return Err(malformed_error!(
                    "Stream {} exceeds metadata - {}+{}",
                    name,
                    stream_offset,
                    stream_size
                ));
            }
            let range = root + stream_offset..root + stream_offset + stream_size;

            match name {
                "#~" | "#-" => tables_stream = Some(range),
                "#Strings" => strings = range,
                "#US" => user_strings = range,
                "#GUID" => {
                    if stream_size % 16 != 0 {
                        return Err(malformed_error!("#GUID size is not a multiple of 16"));
                    }
                    guids = range;
                }
                "#Blob" => blobs = range,
                "#Pdb" => {}
                other => return Err(malformed_error!("Unknown stream name - {}", other)),
            }
        }

        let tables_range =
            tables_stream.ok_or_else(|| malformed_error!("Missing #~ stream"))?;
        let (info, tables, sorted) = parse_tables_header(bytes.data(), tables_range)?;

        let image = RawImage {
            bytes,
            version,
            strings,
            blobs,
            guids,
            user_strings,
            info,
            tables,
            sorted,
        };
        // Validate heap shape once so later lookups only need bounds checks.
        Strings::from(image.heap(&image.strings))?;
        Blob::from(image.heap(&image.blobs))?;

        debug!(
            version = %image.version,
            type_defs = image.row_count(TableId::TypeDef),
            methods = image.row_count(TableId::MethodDef),
            "parsed metadata image"
        );
        Ok(image)
    }

    fn heap(&self, range: &Range<usize>) -> &[u8] {
        &self.bytes.data()[range.clone()]
    }

    /// The metadata version string, e.g. `v4.0.30319`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Row counts and column widths.
    #[must_use]
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.info.rows(table)
    }

    /// True if `table` is flagged as sorted.
    #[must_use]
    pub fn is_sorted(&self, table: TableId) -> bool {
        self.sorted & (1u64 << table as u8) != 0
    }

    /// The `#Strings` heap.
    #[must_use]
    pub fn strings(&self) -> Strings<'_> {
        Strings::from(self.heap(&self.strings)).unwrap_or(Strings::empty())
    }

    /// The `#Blob` heap.
    #[must_use]
    pub fn blobs(&self) -> Blob<'_> {
        Blob::from(self.heap(&self.blobs)).unwrap_or(Blob::empty())
    }

    /// Size of the `#GUID` heap in bytes.
    #[must_use]
    pub fn guid_heap_size(&self) -> usize {
        self.guids.len()
    }

    /// Size of the `#US` heap in bytes.
    #[must_use]
    pub fn user_string_heap_size(&self) -> usize {
        self.user_strings.len()
    }

    /// Reads column `column` of the 1-based `row` of `table`.
    pub fn column(&self, table: TableId, row: u32, column: usize) -> Result<u32> {
        if row == 0 || row > self.row_count(table) {
            return Err(out_of_bounds_error!());
        }

        let columns = table_columns(table);
        let Some(kind) = columns.get(column) else {
            return Err(out_of_bounds_error!());
        };

        let location = self.tables[table as usize];
        let mut offset = location.offset + (row as usize - 1) * location.row_size;
        offset += columns[..column]
            .iter()
            .map(|c| self.info.column_size(*c))
            .sum::<usize>();

        let size = self.info.column_size(*kind);
        read_le_at_dyn(self.bytes.data(), &mut offset, size == 4)
    }
}

fn parse_tables_header(
    data: &[u8],
    range: Range<usize>,
) -> Result<(TableInfo, [TableLocation; TableId::COUNT], u64)> {
    let stream = &data[range.clone()];
    let mut offset = 0;

    let reserved = read_le_at::<u32>(stream, &mut offset)?;
    let major = read_le_at::<u8>(stream, &mut offset)?;
    let minor = read_le_at::<u8>(stream, &mut offset)?;
    if reserved != 0 || major != 2 || minor != 0 {
        return Err(malformed_error!(
            "Unsupported #~ header - reserved {} version {}.{}",
            reserved,
            major,
            minor
        ));
    }

    let heap_sizes = read_le_at::<u8>(stream, &mut offset)?;
    if heap_sizes & !0x7 != 0 {
        return Err(malformed_error!("Unsupported heap size flags - 0x{:02x}", heap_sizes));
    }
    offset += 1;

    let valid = read_le_at::<u64>(stream, &mut offset)?;
    let valid_mask = (1u64 << TableId::COUNT) - 1;
    if valid & !valid_mask != 0 {
        return Err(malformed_error!("Unknown tables present - 0x{:016x}", valid));
    }
    let sorted = read_le_at::<u64>(stream, &mut offset)?;

    let mut rows = [0u32; TableId::COUNT];
    for table in TableId::iter() {
        if valid & (1u64 << table as u8) != 0 {
            rows[table as usize] = read_le_at::<u32>(stream, &mut offset)?;
        }
    }

    let info = TableInfo::new(rows, heap_sizes);
    let mut tables = [TableLocation::default(); TableId::COUNT];
    let mut cursor = range.start + offset;
    for table in TableId::iter() {
        let row_size = info.row_size(table);
        tables[table as usize] = TableLocation {
            offset: cursor,
            row_size,
        };
        cursor += row_size * info.rows(table) as usize;
    }

    if cursor > range.end {
        return Err(malformed_error!(
            "Tables exceed #~ stream - {} > {}",
            cursor,
            range.end
        ));
    }

    Ok((info, tables, sorted))
}

/// Finds the metadata root of a PE image through its CLI header.
fn locate_pe_metadata(data: &[u8]) -> Result<(usize, usize)> {
    let pe = goblin::pe::PE::parse(data)?;

    let Some(optional_header) = pe.header.optional_header.as_ref() else {
        return Err(malformed_error!("PE image has no optional header"));
    };
    let Some(clr) = optional_header.data_directories.get_clr_runtime_header() else {
        return Err(malformed_error!("PE image has no CLI header"));
    };

    let rva_to_offset = |rva: u32| -> Result<usize> {
        pe.sections
            .iter()
            .find(|s| rva >= s.virtual_address && rva < s.virtual_address + s.virtual_size)
            .map(|s| (s.pointer_to_raw_data + rva - s.virtual_address) as usize)
            .ok_or_else(|| malformed_error!("RVA 0x{:08x} is not inside a section", rva))
    };

    let mut offset = rva_to_offset(clr.virtual_address)? + 8;
    let metadata_rva = read_le_at::<u32>(data, &mut offset)?;
    let metadata_size = read_le_at::<u32>(data, &mut offset)? as usize;
    let metadata_offset = rva_to_offset(metadata_rva)?;
    if metadata_offset + metadata_size > data.len() {
        return Err(out_of_bounds_error!());
    }

    Ok((metadata_offset, metadata_size))
}
