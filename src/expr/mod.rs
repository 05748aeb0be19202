//! Typed expression evaluator (C7): a small recursive-descent parser over a C-like
//! grammar, resolving identifiers against the current frame's locals and returning both
//! an owned type and a runtime location.
//!
//! ```text
//! expr    ::= prefix
//! prefix  ::= '*' prefix | '&' prefix | primary
//! primary ::= '(' expr ')' | symbol | number
//! suffix  ::= '[' expr ']'            (zero or more, left-associative, after primary)
//! ```

use crate::controller::Controller;
use crate::dwarf::eval::{self, RtLoc};
use crate::dwarf::type_graph::{Interp, OwnedType, TypeKind, TypeNode};
use crate::error::{Error, Result};

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Cursor { bytes: s.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> u8 {
        self.bytes.get(self.pos).copied().unwrap_or(0)
    }

    fn bump(&mut self) -> u8 {
        let b = self.peek();
        self.pos += 1;
        b
    }

    fn skip_space(&mut self) {
        while matches!(self.peek(), b' ' | b'\n' | b'\t') {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn is_symbol_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_symbol(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Parse and evaluate a full expression against the frame current at the controller's IP.
pub fn evaluate(text: &str, controller: &Controller) -> Result<(OwnedType, RtLoc)> {
    let mut cursor = Cursor::new(text);
    let result = parse_prefix(&mut cursor, controller)?;
    cursor.skip_space();
    if !cursor.at_end() {
        return Err(Error::ParseFailure(format!(
            "trailing input at byte {}",
            cursor.pos
        )));
    }
    Ok(result)
}

fn parse_prefix(cursor: &mut Cursor, controller: &Controller) -> Result<(OwnedType, RtLoc)> {
    cursor.skip_space();
    match cursor.peek() {
        b'*' => {
            cursor.bump();
            let (ty, rtloc) = parse_prefix(cursor, controller)?;
            if !matches!(ty.root().kind, TypeKind::Pointer { .. }) {
                return Err(Error::TypeMismatch("dereference of non-pointer".into()));
            }
            deref(controller, &ty, rtloc)
        }
        b'&' => {
            cursor.bump();
            let (ty, rtloc) = parse_prefix(cursor, controller)?;
            let RtLoc::Address(addr) = rtloc else {
                return Err(Error::TypeMismatch("address-of non-addressable value".into()));
            };
            // §4.6/§9: result rtloc is the address reinterpreted as a host-side scalar.
            Ok((ty.wrap_in_pointer(), RtLoc::from_i64(addr as i64)))
        }
        _ => parse_primary(cursor, controller),
    }
}

fn parse_primary(cursor: &mut Cursor, controller: &Controller) -> Result<(OwnedType, RtLoc)> {
    cursor.skip_space();
    let (ty, rtloc) = if cursor.peek() == b'(' {
        cursor.bump();
        let inner = parse_prefix(cursor, controller)?;
        cursor.skip_space();
        if cursor.peek() != b')' {
            return Err(Error::ParseFailure("expected ')'".into()));
        }
        cursor.bump();
        inner
    } else if is_symbol_start(cursor.peek()) {
        parse_symbol(cursor, controller)?
    } else if cursor.peek().is_ascii_digit() {
        parse_number(cursor)
    } else {
        return Err(Error::ParseFailure(format!(
            "unexpected character at byte {}",
            cursor.pos
        )));
    };

    parse_suffix(cursor, controller, ty, rtloc)
}

fn parse_suffix(
    cursor: &mut Cursor,
    controller: &Controller,
    mut ty: OwnedType,
    mut rtloc: RtLoc,
) -> Result<(OwnedType, RtLoc)> {
    loop {
        cursor.skip_space();
        if cursor.peek() != b'[' {
            return Ok((ty, rtloc));
        }
        cursor.bump();
        let (index_ty, index_rtloc) = parse_prefix(cursor, controller)?;
        cursor.skip_space();
        if cursor.peek() != b']' {
            return Err(Error::ParseFailure("expected ']'".into()));
        }
        cursor.bump();

        let TypeKind::Base { interp, .. } = &index_ty.root().kind else {
            return Err(Error::TypeMismatch("array index must be an integer".into()));
        };
        if !matches!(interp, Interp::Signed | Interp::Unsigned) {
            return Err(Error::TypeMismatch("array index must be an integer".into()));
        }
        let index_bytes = index_rtloc.read(controller.trace, index_ty.root().size as usize)?;
        let index = read_signed(&index_bytes);

        let (element_ty, element_rtloc) = deref_index(controller, &ty, rtloc, index)?;
        ty = element_ty;
        rtloc = element_rtloc;
    }
}

fn parse_symbol(cursor: &mut Cursor, controller: &Controller) -> Result<(OwnedType, RtLoc)> {
    let start = cursor.pos;
    while is_symbol(cursor.peek()) {
        cursor.bump();
    }
    let name = std::str::from_utf8(&cursor.bytes[start..cursor.pos])
        .map_err(|_| Error::ParseFailure("invalid identifier".into()))?;

    let ip = controller.trace.read_ip()?;
    let unit = controller
        .surrounding_comp_unit(ip)
        .ok_or(Error::NoSurroundingFunction)?;
    let func = unit
        .surrounding_function(ip)
        .ok_or(Error::NoSurroundingFunction)?;
    let local = func
        .local(name)
        .ok_or_else(|| Error::UnknownIdentifier(name.to_string()))?;

    let ty = match local.ty {
        crate::dwarf::type_graph::Edge::Resolved(id) => unit.types.clone_owned(id),
        _ => return Err(Error::TypeNotFound(0u64.into())),
    };
    let rtloc = eval::evaluate(&local.locdesc, controller.trace, None)?;
    Ok((ty, rtloc))
}

/// Mirrors the observed parser's combined-digit algorithm: digits before and after the
/// decimal point accumulate into one integer, then the fractional reading is recovered by
/// dividing by the power of ten the fractional digit count implies.
fn parse_number(cursor: &mut Cursor) -> (OwnedType, RtLoc) {
    let mut value: i64 = 0;
    while cursor.peek().is_ascii_digit() {
        value = value.wrapping_mul(10).wrapping_add((cursor.bump() - b'0') as i64);
    }
    if cursor.peek() == b'.' {
        cursor.bump();
        let mut shift: i64 = 1;
        while cursor.peek().is_ascii_digit() {
            value = value.wrapping_mul(10).wrapping_add((cursor.bump() - b'0') as i64);
            shift *= 10;
        }
        let as_float = value as f64 / shift as f64;
        let ty = OwnedType {
            nodes: vec![TypeNode::new_base(0, "double", 8, Interp::Float)],
            root: 0,
        };
        (ty, RtLoc::from_f64(as_float))
    } else {
        let ty = OwnedType {
            nodes: vec![TypeNode::new_base(0, "long long", 8, Interp::Signed)],
            root: 0,
        };
        (ty, RtLoc::from_i64(value))
    }
}

fn read_signed(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_ne_bytes(buf)
}

/// `*p`: read the pointer's value to obtain the target address (§4.6 "Deref").
fn deref(controller: &Controller, ty: &OwnedType, rtloc: RtLoc) -> Result<(OwnedType, RtLoc)> {
    let pointee_id = match &ty.root().kind {
        TypeKind::Pointer { pointee } => pointee.resolved(),
        _ => None,
    };
    let Some(pointee_id) = pointee_id else {
        return Err(Error::TypeMismatch("pointer has no resolvable pointee type".into()));
    };
    let addr_bytes = rtloc.read(controller.trace, 8)?;
    let mut buf = [0u8; 8];
    buf[..addr_bytes.len().min(8)].copy_from_slice(&addr_bytes[..addr_bytes.len().min(8)]);
    let address = u64::from_ne_bytes(buf);

    let pointee_owned = OwnedType {
        nodes: ty.nodes.clone(),
        root: pointee_id,
    };
    Ok((pointee_owned, RtLoc::Address(address)))
}

/// `a[i]`: offset by `index * elementSize` from `a`'s base address, then offset by that
/// amount (§4.6 "DerefIndex"). Out-of-bounds is not checked; arrays carry no length here.
///
/// An array's own `RtLoc` already names its base address (a local of array type is its
/// first element's address, no indirection); a pointer's `RtLoc` names where the pointer
/// *value* is stored, so indexing through one first reads that stored value.
fn deref_index(
    controller: &Controller,
    ty: &OwnedType,
    rtloc: RtLoc,
    index: i64,
) -> Result<(OwnedType, RtLoc)> {
    let (element_id, base) = match &ty.root().kind {
        TypeKind::Array { element } => {
            let id = element.resolved().ok_or_else(|| Error::TypeMismatch("element type does not resolve".into()))?;
            let base = match rtloc {
                RtLoc::Address(a) => a,
                RtLoc::HostTemp(bits) => bits,
                RtLoc::Register(num) => controller.trace.read_dwarf_register(num)?,
            };
            (id, base)
        }
        TypeKind::Pointer { pointee } => {
            let id = pointee.resolved().ok_or_else(|| Error::TypeMismatch("pointee type does not resolve".into()))?;
            let base_bytes = rtloc.read(controller.trace, 8)?;
            (id, read_signed(&base_bytes) as u64)
        }
        _ => return Err(Error::TypeMismatch("indexing a non-pointer, non-array value".into())),
    };
    let element_size = ty.nodes[element_id].size as i64;
    let address = (base as i64 + index * element_size) as u64;

    let element_owned = OwnedType {
        nodes: ty.nodes.clone(),
        root: element_id,
    };
    Ok((element_owned, RtLoc::Address(address)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::type_graph::{Edge, TypeArena};
    use crate::dwarf::unit::{CompUnit, Function, Local};
    use crate::breakpoint::BreakpointTable;
    use crate::dwarf::Info;
    use crate::trace::fake::FakeTrace;

    fn int_array_fixture() -> (Info, FakeTrace) {
        let mut arena = TypeArena::default();
        let int_id = arena.push(TypeNode::new_base(1, "int", 4, Interp::Signed));
        let array_id = arena.push(TypeNode::new_array(2, Edge::Resolved(int_id), 0));

        let local = Local {
            name: "arr".into(),
            // DW_OP_fbreg 0, sentinel -- bp itself names the array's base address.
            locdesc: crate::dwarf::unit::LocDesc::new(vec![0x91, 0x00, 0x00]),
            ty: Edge::Resolved(array_id),
        };

        let func = Function {
            name: "main".into(),
            begin: crate::address::Address::from(0x1000u64),
            end: crate::address::Address::from(0x2000u64),
            lines: Vec::new(),
            locals: vec![local],
        };

        let unit = CompUnit {
            name: "t.c".into(),
            comp_dir: "/".into(),
            producer: "cc".into(),
            begin: crate::address::Address::from(0x1000u64),
            end: crate::address::Address::from(0x2000u64),
            functions: vec![func],
            types: arena,
        };

        let fake = FakeTrace::new();
        fake.ip.set(0x1500);
        fake.bp.set(0x3000);

        (Info { units: vec![unit] }, fake)
    }

    /// Scenario S3: integer and float literals produce the documented type/rtloc pair.
    #[test]
    fn number_literals() {
        let (info, fake) = int_array_fixture();
        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);

        let (ty, rtloc) = evaluate("42", &controller).unwrap();
        assert!(matches!(ty.root().kind, TypeKind::Base { ref name, interp: Interp::Signed } if name == "long long"));
        assert_eq!(rtloc, RtLoc::from_i64(42));

        let (ty, rtloc) = evaluate("3.5", &controller).unwrap();
        assert!(matches!(ty.root().kind, TypeKind::Base { ref name, interp: Interp::Float } if name == "double"));
        assert_eq!(rtloc, RtLoc::from_f64(3.5));
    }

    /// Scenario S6: `arr[2]` on an array of 4-byte ints at base 0x3000 lands at 0x3008.
    #[test]
    fn array_indexing() {
        let (info, fake) = int_array_fixture();
        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);

        let (_, rtloc) = evaluate("arr[2]", &controller).unwrap();
        assert_eq!(rtloc, RtLoc::Address(0x3008));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let (info, fake) = int_array_fixture();
        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);
        let err = evaluate("nope", &controller).unwrap_err();
        assert!(matches!(err, Error::UnknownIdentifier(_)));
    }
}
