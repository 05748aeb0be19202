//! Builds the debug-info model from an object file's DWARF sections (C3).
//!
//! Two logical passes per compilation unit (§4.1): a structural pass that walks the DIE
//! tree collecting functions, locals and type nodes (type cross-references left as
//! `Unresolved(dieOffset)` placeholders), then a resolution pass that rewrites every
//! placeholder now that all of the unit's type nodes are known. The object file itself is
//! memory-mapped rather than read into a heap buffer; section bytes are tokenized by
//! `gimli`, and this module's own code starts at DIE-tree walking.

use crate::address::Address;
use crate::dwarf::type_graph::{Edge, Interp, TypeArena, TypeNode};
use crate::dwarf::unit::{CompUnit, Function, Line, LocDesc, Local};
use crate::dwarf::{EndianRcSlice, Info};
use crate::error::{Error, Result};
use fallible_iterator::FallibleIterator;
use gimli::{AttributeValue, DebuggingInformationEntry, Dwarf, RunTimeEndian, SectionId, Unit, UnitOffset};
use memmap2::Mmap;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

/// Load an executable's debug information. Returns [`Error::Open`] if the file can't be
/// mapped, and the corresponding granular error (§4.1 "Failure semantics") if a specific
/// subtree is malformed; a failed load never returns a partially built [`Info`].
pub fn load_info(path: impl AsRef<Path>) -> Result<Info> {
    let file = File::open(path.as_ref()).map_err(Error::Open)?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(Error::Open)?;
    let object = object::File::parse(&*mmap)?;

    let endian = if object.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let load_section = |id: SectionId| -> std::result::Result<EndianRcSlice, gimli::Error> {
        let data = object
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        Ok(gimli::EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = Dwarf::load(load_section).map_err(Error::DwarfParsing)?;

    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers.next().map_err(|e| Error::CompUnit(e.to_string()))? {
        let unit = dwarf
            .unit(header)
            .map_err(|e| Error::CompUnit(e.to_string()))?;
        units.push(load_unit(&dwarf, &unit)?);
    }

    Ok(Info { units })
}

fn attr_string(
    dwarf: &Dwarf<EndianRcSlice>,
    unit: &Unit<EndianRcSlice>,
    entry: &DebuggingInformationEntry<EndianRcSlice>,
    attr: gimli::DwAt,
) -> Option<String> {
    let value = entry.attr_value(attr).ok()??;
    dwarf
        .attr_string(unit, value)
        .ok()
        .map(|s| s.to_string_lossy().into_owned())
}

fn attr_addr(entry: &DebuggingInformationEntry<EndianRcSlice>, attr: gimli::DwAt) -> Option<u64> {
    match entry.attr_value(attr).ok()?? {
        AttributeValue::Addr(a) => Some(a),
        _ => None,
    }
}

fn attr_udata(entry: &DebuggingInformationEntry<EndianRcSlice>, attr: gimli::DwAt) -> Option<u64> {
    match entry.attr_value(attr).ok()?? {
        AttributeValue::Udata(v) => Some(v),
        AttributeValue::Data1(v) => Some(v as u64),
        AttributeValue::Data2(v) => Some(v as u64),
        AttributeValue::Data4(v) => Some(v as u64),
        AttributeValue::Data8(v) => Some(v),
        AttributeValue::Addr(v) => Some(v),
        _ => None,
    }
}

fn attr_type_offset(entry: &DebuggingInformationEntry<EndianRcSlice>) -> Option<Edge> {
    match entry.attr_value(gimli::DW_AT_type).ok()?? {
        AttributeValue::UnitRef(UnitOffset(offset)) => Some(Edge::Unresolved(offset as u64)),
        _ => None,
    }
}

fn attr_location(entry: &DebuggingInformationEntry<EndianRcSlice>) -> Result<LocDesc> {
    let value = entry
        .attr_value(gimli::DW_AT_location)
        .map_err(|e| Error::Local(e.to_string()))?
        .ok_or_else(|| Error::Local("missing DW_AT_location".to_string()))?;
    let mut bytes = match value {
        AttributeValue::Exprloc(expr) => {
            expr.0.to_slice().map_err(|e| Error::Local(e.to_string()))?.to_vec()
        }
        AttributeValue::Block(block) => {
            block.to_slice().map_err(|e| Error::Local(e.to_string()))?.to_vec()
        }
        other => return Err(Error::Local(format!("unsupported location form: {other:?}"))),
    };
    bytes.push(0); // end-of-expression sentinel (§4.4)
    Ok(LocDesc::new(bytes))
}

fn load_base_type(
    dwarf: &Dwarf<EndianRcSlice>,
    unit: &Unit<EndianRcSlice>,
    entry: &DebuggingInformationEntry<EndianRcSlice>,
) -> Result<TypeNode> {
    let offset = entry.offset().0 as u64;
    let name = attr_string(dwarf, unit, entry, gimli::DW_AT_name).unwrap_or_else(|| "<anonymous>".to_string());
    let size = attr_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0) as u32;
    let encoding = match entry.attr_value(gimli::DW_AT_encoding) {
        Ok(Some(AttributeValue::Encoding(e))) => e,
        _ => return Err(Error::Type(format!("base type {offset:#x} has no encoding"))),
    };
    let interp = Interp::from_dwarf_encoding(encoding)
        .ok_or_else(|| Error::Type(format!("base type {offset:#x} has unsupported encoding {encoding:?}")))?;
    Ok(TypeNode::new_base(offset, name, size, interp))
}

/// One DIE-tree walk over the whole unit: `subprogram`s and `base_type`/`pointer_type`/
/// `array_type`/`structure_type` DIEs are only collected when they're direct children of
/// the CU root — a struct or function nested inside another function's body is out of
/// scope, not promoted into this unit. `variable`/`formal_parameter` DIEs anywhere inside
/// a subprogram's own subtree (lexical blocks included, nested subprograms excluded)
/// become that function's locals.
fn load_unit(dwarf: &Dwarf<EndianRcSlice>, unit: &Unit<EndianRcSlice>) -> Result<CompUnit> {
    let mut name = String::new();
    let mut comp_dir = String::new();
    let mut producer = String::new();

    let mut functions = Vec::new();
    let mut arena = TypeArena::default();

    // (depth at which the function's subtree started, the function being assembled)
    let mut current: Option<(isize, Function)> = None;
    let mut depth: isize = 0;
    // Set to the depth of a nested subprogram DIE while we skip its whole subtree.
    let mut skip_until: Option<isize> = None;

    let mut entries = unit.entries();
    let mut first = true;
    while let Some((delta, entry)) = entries.next_dfs().map_err(|e| Error::Info(e.to_string()))? {
        depth += delta;

        if first {
            first = false;
            name = attr_string(dwarf, unit, entry, gimli::DW_AT_name).unwrap_or_default();
            comp_dir = attr_string(dwarf, unit, entry, gimli::DW_AT_comp_dir).unwrap_or_default();
            producer = attr_string(dwarf, unit, entry, gimli::DW_AT_producer).unwrap_or_default();
            continue;
        }

        if let Some((start_depth, _)) = &current {
            if depth <= *start_depth {
                let (_, func) = current.take().unwrap();
                functions.push(func);
            }
        }

        if let Some(skip_depth) = skip_until {
            if depth > skip_depth {
                continue;
            }
            skip_until = None;
        }

        match entry.tag() {
            gimli::DW_TAG_subprogram => {
                if depth != 1 {
                    // Nested subprogram (lexical-block or GCC nested-function extension):
                    // out of scope, and its locals aren't this function's either.
                    skip_until = Some(depth);
                    continue;
                }
                if let Some((_, func)) = current.take() {
                    functions.push(func);
                }
                let func_name = attr_string(dwarf, unit, entry, gimli::DW_AT_name)
                    .unwrap_or_else(|| "<anonymous>".to_string());
                let low_pc = attr_addr(entry, gimli::DW_AT_low_pc);
                let high_pc_raw = attr_udata(entry, gimli::DW_AT_high_pc);
                if let (Some(low_pc), Some(high_pc_raw)) = (low_pc, high_pc_raw) {
                    current = Some((
                        depth,
                        Function {
                            name: func_name,
                            begin: Address::from(low_pc),
                            end: Address::from(low_pc + high_pc_raw),
                            lines: Vec::new(),
                            locals: Vec::new(),
                        },
                    ));
                }
                // Subprograms with no PC range (declarations, inlined-away) are skipped.
            }
            gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter => {
                if let Some((_, func)) = current.as_mut() {
                    let local_name = attr_string(dwarf, unit, entry, gimli::DW_AT_name)
                        .unwrap_or_else(|| "<anonymous>".to_string());
                    if let Ok(locdesc) = attr_location(entry) {
                        let ty = attr_type_offset(entry).unwrap_or(Edge::Null);
                        func.locals.push(Local {
                            name: local_name,
                            locdesc,
                            ty,
                        });
                    }
                    // locals without a resolvable location (optimized away) are skipped.
                }
            }
            gimli::DW_TAG_base_type if depth == 1 => {
                arena.push(load_base_type(dwarf, unit, entry)?);
            }
            gimli::DW_TAG_pointer_type if depth == 1 => {
                let offset = entry.offset().0 as u64;
                let pointee = attr_type_offset(entry).unwrap_or(Edge::Null);
                arena.push(TypeNode::new_pointer(offset, pointee));
            }
            gimli::DW_TAG_array_type if depth == 1 => {
                let offset = entry.offset().0 as u64;
                let element = attr_type_offset(entry).unwrap_or(Edge::Null);
                let size = attr_udata(entry, gimli::DW_AT_byte_size).unwrap_or(0) as u32;
                arena.push(TypeNode::new_array(offset, element, size));
            }
            gimli::DW_TAG_structure_type if depth == 1 => {
                let offset = entry.offset().0 as u64;
                let struct_name = attr_string(dwarf, unit, entry, gimli::DW_AT_name)
                    .unwrap_or_else(|| "<anonymous>".to_string());
                arena.push(TypeNode::new_struct(offset, struct_name));
            }
            _ => {}
        }
    }
    if let Some((_, func)) = current.take() {
        functions.push(func);
    }

    // Pass 2: rewrite placeholder edges now that every node in this unit is known.
    arena.resolve_all();
    for func in &mut functions {
        for local in &mut func.locals {
            local.ty = arena.resolve_edge(local.ty);
        }
    }

    attach_lines(unit, &mut functions)?;

    functions.sort_by_key(|f| f.begin);
    let begin = functions.iter().map(|f| f.begin).min().unwrap_or_default();
    let end = functions.iter().map(|f| f.end).max().unwrap_or_default();

    Ok(CompUnit {
        name,
        comp_dir,
        producer,
        begin,
        end,
        functions,
        types: arena,
    })
}

/// Consume the unit's line program and distribute rows to the functions they fall inside
/// (§4.1 "Line table"): walk functions and lines in parallel, append a row only when its
/// number differs from the previously appended number — that counter is global over the
/// whole row stream, not reset at function boundaries — then drop each function's first
/// row (it names the prologue, not a meaningful source position).
fn attach_lines(unit: &Unit<EndianRcSlice>, functions: &mut Vec<Function>) -> Result<()> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(());
    };
    let mut rows = program.rows();
    let mut all_rows = Vec::new();
    while let Some((_, row)) = rows.next_row().map_err(|e| Error::Lines(e.to_string()))? {
        let Some(line) = row.line() else { continue };
        all_rows.push((row.address(), line.get() as u32));
    }
    all_rows.sort_by_key(|(addr, _)| *addr);

    functions.sort_by_key(|f| f.begin);

    let mut func_idx = 0usize;
    let mut last_number: Option<u32> = None;
    for (addr, number) in all_rows {
        let address = Address::from(addr);
        while func_idx < functions.len() && address >= functions[func_idx].end {
            func_idx += 1;
        }
        if func_idx >= functions.len() {
            break;
        }
        if address < functions[func_idx].begin {
            continue;
        }
        if last_number == Some(number) {
            continue;
        }
        last_number = Some(number);
        functions[func_idx].lines.push(Line { number, address });
    }

    for func in functions.iter_mut() {
        if !func.lines.is_empty() {
            func.lines.remove(0);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::unit::Line as DwarfLine;

    fn func(begin: u64, end: u64) -> Function {
        Function {
            name: "f".into(),
            begin: Address::from(begin),
            end: Address::from(end),
            lines: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Mirrors scenario S5 directly against the dedup/first-drop algorithm, without going
    /// through a compiled fixture's line program.
    #[test]
    fn line_dedup_and_first_drop_matches_scenario_s5() {
        let mut functions = vec![func(0x1000, 0x1040), func(0x1040, 0x1080)];
        let rows = [(0x1004u64, 10u32), (0x1010, 11), (0x1044, 20), (0x1050, 21)];

        functions.sort_by_key(|f| f.begin);
        let mut func_idx = 0usize;
        let mut last_number: Option<u32> = None;
        for (addr, number) in rows {
            let address = Address::from(addr);
            while func_idx < functions.len() && address >= functions[func_idx].end {
                func_idx += 1;
            }
            if last_number == Some(number) {
                continue;
            }
            last_number = Some(number);
            functions[func_idx].lines.push(DwarfLine { number, address });
        }
        for f in functions.iter_mut() {
            if !f.lines.is_empty() {
                f.lines.remove(0);
            }
        }

        assert_eq!(
            functions[0].lines,
            vec![DwarfLine { number: 11, address: Address::from(0x1010) }]
        );
        assert_eq!(
            functions[1].lines,
            vec![DwarfLine { number: 21, address: Address::from(0x1050) }]
        );
    }

    /// g's first row repeats f's last kept number (e.g. a `}`/`{` pair sharing one physical
    /// line). The duplicate check must span the function boundary: g's "own" first entry is
    /// the next distinct number, which first-row-drop then removes, leaving g empty.
    #[test]
    fn line_dedup_persists_across_function_boundary() {
        let mut functions = vec![func(0x1000, 0x1040), func(0x1040, 0x1080)];
        let rows = [(0x1004u64, 10u32), (0x1010, 11), (0x1044, 11), (0x1050, 21)];

        functions.sort_by_key(|f| f.begin);
        let mut func_idx = 0usize;
        let mut last_number: Option<u32> = None;
        for (addr, number) in rows {
            let address = Address::from(addr);
            while func_idx < functions.len() && address >= functions[func_idx].end {
                func_idx += 1;
            }
            if last_number == Some(number) {
                continue;
            }
            last_number = Some(number);
            functions[func_idx].lines.push(DwarfLine { number, address });
        }
        for f in functions.iter_mut() {
            if !f.lines.is_empty() {
                f.lines.remove(0);
            }
        }

        assert_eq!(
            functions[0].lines,
            vec![DwarfLine { number: 11, address: Address::from(0x1010) }]
        );
        assert_eq!(functions[1].lines, vec![]);
    }
}
