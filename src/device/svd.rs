//! CMSIS-SVD reader
//!
//! Walks the XML tree with roxmltree and builds the owned [`Device`] model.
//! Handles `derivedFrom` peripherals, `dim` arrays, register clusters and the
//! three ways SVD describes field geometry.

use super::{Device, DeviceError, Field, Peripheral, Register};
use roxmltree::{Document, Node};
use std::collections::HashSet;

type Result<T> = std::result::Result<T, DeviceError>;

/// Largest `dim` accepted for a register or cluster array
const MAX_DIM: u64 = 4096;

pub(super) fn parse_device(text: &str) -> Result<Device> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    if !root.has_tag_name("device") {
        return Err(DeviceError::NotSvd(root.tag_name().name().to_string()));
    }

    let mut peripherals = Vec::new();
    // (index into `peripherals`, name of the base peripheral)
    let mut derived = Vec::new();

    if let Some(list) = child(root, "peripherals") {
        for node in list.children().filter(|n| n.has_tag_name("peripheral")) {
            let periph = parse_peripheral(node)?;
            if let Some(base) = node.attribute("derivedFrom") {
                derived.push((peripherals.len(), base.trim().to_string()));
            }
            peripherals.push(periph);
        }
    }

    resolve_derived(&mut peripherals, derived)?;
    for periph in &peripherals {
        for reg in &periph.registers {
            if periph.base_address.checked_add(reg.offset).is_none() {
                return Err(DeviceError::InvalidNumber {
                    element: "addressOffset",
                    value: format!("{:#x}", reg.offset),
                    context: format!("register {}.{}", periph.name, reg.name),
                });
            }
        }
    }

    Ok(Device {
        name: child_text(root, "name").unwrap_or_default(),
        description: child_text(root, "description")
            .map(|d| collapse(&d))
            .unwrap_or_default(),
        peripherals,
    })
}

fn parse_peripheral(node: Node) -> Result<Peripheral> {
    let name = child_text(node, "name").ok_or_else(|| DeviceError::MissingElement {
        element: "name",
        context: "peripheral".into(),
    })?;
    let context = format!("peripheral {}", name);
    let base_address = required_number(node, "baseAddress", &context)?;

    let mut registers = Vec::new();
    if let Some(list) = child(node, "registers") {
        collect_registers(list, 0, "", &name, &mut registers)?;
    }

    Ok(Peripheral {
        name,
        base_address,
        description: description_of(node),
        registers,
    })
}

/// Flatten `<register>` and `<cluster>` children of `list` into `out`
fn collect_registers(
    list: Node,
    offset_base: u64,
    prefix: &str,
    periph: &str,
    out: &mut Vec<Register>,
) -> Result<()> {
    for node in list.children().filter(Node::is_element) {
        match node.tag_name().name() {
            "register" => out.extend(parse_register(node, offset_base, prefix, periph)?),
            "cluster" => {
                let name = child_text(node, "name").ok_or_else(|| DeviceError::MissingElement {
                    element: "name",
                    context: format!("cluster in peripheral {}", periph),
                })?;
                let context = format!("cluster {}.{}", periph, name);
                let offset = required_number(node, "addressOffset", &context)?;

                for (instance, extra) in dim_instances(node, &name, &context)? {
                    let nested = format!("{}{}_", prefix, instance);
                    let base = add_offsets(offset_base, offset, extra, &context)?;
                    collect_registers(node, base, &nested, periph, out)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_register(node: Node, offset_base: u64, prefix: &str, periph: &str) -> Result<Vec<Register>> {
    let name = child_text(node, "name").ok_or_else(|| DeviceError::MissingElement {
        element: "name",
        context: format!("register in peripheral {}", periph),
    })?;
    let context = format!("register {}.{}", periph, name);
    let offset = required_number(node, "addressOffset", &context)?;

    let size = optional_number(node, "size", &context)?.map(|s| s as u32);
    let reset_value = optional_number(node, "resetValue", &context)?;
    let access = child_text(node, "access");
    let description = description_of(node);

    let mut fields = Vec::new();
    if let Some(list) = child(node, "fields") {
        for field in list.children().filter(|n| n.has_tag_name("field")) {
            fields.push(parse_field(field, &context)?);
        }
    }

    dim_instances(node, &name, &context)?
        .into_iter()
        .map(|(instance, extra)| {
            Ok(Register {
                name: format!("{}{}", prefix, instance),
                offset: add_offsets(offset_base, offset, extra, &context)?,
                description: description.clone(),
                size,
                reset_value,
                access: access.clone(),
                fields: fields.clone(),
            })
        })
        .collect()
}

fn add_offsets(base: u64, offset: u64, extra: u64, context: &str) -> Result<u64> {
    base.checked_add(offset)
        .and_then(|o| o.checked_add(extra))
        .ok_or_else(|| DeviceError::InvalidNumber {
            element: "addressOffset",
            value: format!("{:#x}", offset),
            context: context.to_string(),
        })
}

fn parse_field(node: Node, register: &str) -> Result<Field> {
    let name = child_text(node, "name").ok_or_else(|| DeviceError::MissingElement {
        element: "name",
        context: format!("field of {}", register),
    })?;
    let context = format!("field {} of {}", name, register);

    let (bit_offset, bit_width) = if let Some(offset) = optional_number(node, "bitOffset", &context)? {
        let width = optional_number(node, "bitWidth", &context)?.unwrap_or(1);
        (offset, width)
    } else if let Some(lsb) = optional_number(node, "lsb", &context)? {
        let msb = required_number(node, "msb", &context)?;
        let width = msb
            .checked_sub(lsb)
            .and_then(|w| w.checked_add(1))
            .ok_or_else(|| DeviceError::InvalidNumber {
                element: "msb",
                value: msb.to_string(),
                context,
            })?;
        (lsb, width)
    } else if let Some(range) = child_text(node, "bitRange") {
        parse_bit_range(&range).ok_or(DeviceError::InvalidNumber {
            element: "bitRange",
            value: range,
            context,
        })?
    } else {
        return Err(DeviceError::MissingElement {
            element: "bitOffset",
            context,
        });
    };

    Ok(Field {
        name,
        bit_offset: bit_offset as u32,
        bit_width: bit_width as u32,
        description: description_of(node),
    })
}

/// `[msb:lsb]` → (offset, width)
fn parse_bit_range(s: &str) -> Option<(u64, u64)> {
    let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
    let (msb, lsb) = inner.split_once(':')?;
    let msb = parse_number(msb)?;
    let lsb = parse_number(lsb)?;
    let width = msb.checked_sub(lsb)?.checked_add(1)?;
    Some((lsb, width))
}

/// Expand `dim` arrays into (name, extra offset) pairs.
///
/// A node without `<dim>` yields itself once at offset 0.
fn dim_instances(node: Node, name: &str, context: &str) -> Result<Vec<(String, u64)>> {
    let Some(count) = optional_number(node, "dim", context)? else {
        return Ok(vec![(name.to_string(), 0)]);
    };
    if count > MAX_DIM {
        return Err(DeviceError::InvalidNumber {
            element: "dim",
            value: count.to_string(),
            context: context.to_string(),
        });
    }
    let increment = required_number(node, "dimIncrement", context)?;

    let indices: Vec<String> = match child_text(node, "dimIndex") {
        Some(spec) => parse_dim_index(&spec).ok_or(DeviceError::InvalidNumber {
            element: "dimIndex",
            value: spec.clone(),
            context: context.to_string(),
        })?,
        None => (0..count).map(|i| i.to_string()).collect(),
    };

    indices
        .iter()
        .take(count as usize)
        .enumerate()
        .map(|(i, index)| {
            let expanded = if name.contains("[%s]") {
                name.replace("[%s]", index)
            } else {
                name.replace("%s", index)
            };
            let extra = increment
                .checked_mul(i as u64)
                .ok_or_else(|| DeviceError::InvalidNumber {
                    element: "dimIncrement",
                    value: format!("{:#x}", increment),
                    context: context.to_string(),
                })?;
            Ok((expanded, extra))
        })
        .collect()
}

/// `0-3`, `A-D` or `A,B,C`
fn parse_dim_index(spec: &str) -> Option<Vec<String>> {
    let spec = spec.trim();
    if spec.contains(',') {
        return Some(spec.split(',').map(|s| s.trim().to_string()).collect());
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if let (Ok(a), Ok(b)) = (start.parse::<u64>(), end.parse::<u64>()) {
        return (a <= b && b - a < MAX_DIM).then(|| (a..=b).map(|i| i.to_string()).collect());
    }

    let (a, b) = (single_char(start)?, single_char(end)?);
    (a <= b).then(|| (a..=b).map(|c| c.to_string()).collect())
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

/// Copy registers from base peripherals into `derivedFrom` peripherals.
///
/// Bases may themselves be derived, so resolve in passes until nothing changes.
fn resolve_derived(peripherals: &mut [Peripheral], mut pending: Vec<(usize, String)>) -> Result<()> {
    while !pending.is_empty() {
        let unresolved: HashSet<usize> = pending.iter().map(|(idx, _)| *idx).collect();
        let before = pending.len();

        let mut still_pending = Vec::new();
        for (idx, base_name) in pending {
            let base = peripherals
                .iter()
                .position(|p| p.name == base_name)
                .filter(|base| !unresolved.contains(base) && *base != idx);

            match base {
                Some(base) => {
                    let source = peripherals[base].clone();
                    let target = &mut peripherals[idx];
                    if target.registers.is_empty() {
                        target.registers = source.registers;
                    }
                    if target.description.is_empty() {
                        target.description = source.description;
                    }
                }
                None => still_pending.push((idx, base_name)),
            }
        }

        if still_pending.len() == before {
            let (idx, base) = still_pending.swap_remove(0);
            return Err(DeviceError::UnknownBase {
                peripheral: peripherals[idx].name.clone(),
                base,
            });
        }
        pending = still_pending;
    }
    Ok(())
}

/// SVD scaled non-negative integer: `0x1F`, `31`, or `#11111`
pub(super) fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix('#').or_else(|| s.strip_prefix("0b")) {
        // 'x' marks don't-care bits in enumerated values
        u64::from_str_radix(&bin.replace(['x', 'X'], "0"), 2).ok()
    } else {
        s.parse().ok()
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text(node: Node, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn description_of(node: Node) -> String {
    child_text(node, "description")
        .map(|d| collapse(&d))
        .unwrap_or_default()
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn optional_number(node: Node, tag: &'static str, context: &str) -> Result<Option<u64>> {
    match child_text(node, tag) {
        Some(text) => parse_number(&text)
            .map(Some)
            .ok_or_else(|| DeviceError::InvalidNumber {
                element: tag,
                value: text,
                context: context.to_string(),
            }),
        None => Ok(None),
    }
}

fn required_number(node: Node, tag: &'static str, context: &str) -> Result<u64> {
    optional_number(node, tag, context)?.ok_or_else(|| DeviceError::MissingElement {
        element: tag,
        context: context.to_string(),
    })
}
