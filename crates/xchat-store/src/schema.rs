//! XSD subset compiler and validator.
//!
//! Supports the part of XSD 1.0 the chat document needs: one top-level
//! element, named or anonymous complex types built from `xs:sequence`,
//! `xs:attribute` and `xs:simpleContent`, named simple types restricted by
//! length, range and enumeration facets, and `xs:unique` / `xs:key`
//! constraints with relative path selectors. Anything else is rejected at
//! compile time.

use crate::element::Element;
use crate::error::{Result, StoreError, ValidationReport};
use chrono::DateTime;
use std::collections::{HashMap, HashSet};

/// The schema the chat document is validated against by default.
pub const BUILTIN_XSD: &str = include_str!("../schema/chat.xsd");

const MAX_TYPE_DEPTH: usize = 32;

/// A compiled schema, ready to validate element trees.
#[derive(Debug, Clone)]
pub struct Schema {
    root: ElementDecl,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    min_occurs: u32,
    max_occurs: Option<u32>,
    model: ContentModel,
    uniques: Vec<UniqueConstraint>,
}

#[derive(Debug, Clone, Default)]
struct ContentModel {
    attributes: Vec<AttributeDecl>,
    children: Vec<ElementDecl>,
    text: Option<SimpleType>,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    ty: SimpleType,
    required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltIn {
    String,
    DateTime,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    Boolean,
}

impl BuiltIn {
    fn from_local(name: &str) -> Option<Self> {
        match name {
            "string" => Some(BuiltIn::String),
            "dateTime" => Some(BuiltIn::DateTime),
            "integer" | "long" | "int" => Some(BuiltIn::Integer),
            "nonNegativeInteger" => Some(BuiltIn::NonNegativeInteger),
            "positiveInteger" => Some(BuiltIn::PositiveInteger),
            "boolean" => Some(BuiltIn::Boolean),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            BuiltIn::Integer | BuiltIn::NonNegativeInteger | BuiltIn::PositiveInteger
        )
    }
}

#[derive(Debug, Clone)]
struct SimpleType {
    name: String,
    base: BuiltIn,
    enumeration: Vec<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_inclusive: Option<i64>,
    max_inclusive: Option<i64>,
}

impl SimpleType {
    fn builtin(name: &str, base: BuiltIn) -> Self {
        Self {
            name: name.to_string(),
            base,
            enumeration: Vec::new(),
            min_length: None,
            max_length: None,
            min_inclusive: None,
            max_inclusive: None,
        }
    }

    fn check(&self, value: &str) -> std::result::Result<(), String> {
        // Only xs:string preserves surrounding whitespace.
        let value = match self.base {
            BuiltIn::String => value,
            _ => value.trim(),
        };
        let number = match self.base {
            BuiltIn::String => None,
            BuiltIn::DateTime => {
                DateTime::parse_from_rfc3339(value)
                    .map_err(|_| format!("'{}' is not a valid dateTime", value))?;
                None
            }
            BuiltIn::Boolean => {
                if !matches!(value, "true" | "false" | "1" | "0") {
                    return Err(format!("'{}' is not a valid boolean", value));
                }
                None
            }
            BuiltIn::Integer | BuiltIn::NonNegativeInteger | BuiltIn::PositiveInteger => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid integer", value))?;
                if self.base == BuiltIn::NonNegativeInteger && n < 0 {
                    return Err(format!("'{}' must not be negative", value));
                }
                if self.base == BuiltIn::PositiveInteger && n <= 0 {
                    return Err(format!("'{}' must be positive", value));
                }
                Some(n)
            }
        };

        if !self.enumeration.is_empty() && !self.enumeration.iter().any(|e| e == value) {
            return Err(format!(
                "'{}' is not one of [{}] ({})",
                value,
                self.enumeration.join(", "),
                self.name
            ));
        }

        let len = value.chars().count();
        if let Some(min) = self.min_length {
            if len < min {
                return Err(format!("length {} is below minLength {} ({})", len, min, self.name));
            }
        }
        if let Some(max) = self.max_length {
            if len > max {
                return Err(format!("length {} exceeds maxLength {} ({})", len, max, self.name));
            }
        }

        if let Some(n) = number {
            if let Some(min) = self.min_inclusive {
                if n < min {
                    return Err(format!("{} is below minInclusive {}", n, min));
                }
            }
            if let Some(max) = self.max_inclusive {
                if n > max {
                    return Err(format!("{} exceeds maxInclusive {}", n, max));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct UniqueConstraint {
    name: String,
    is_key: bool,
    selector: Vec<String>,
    fields: Vec<Field>,
}

#[derive(Debug, Clone)]
enum Field {
    Attribute(String),
    Child(String),
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

fn schema_err(msg: impl Into<String>) -> StoreError {
    StoreError::Schema(msg.into())
}

struct Compiler<'a> {
    simple_types: HashMap<&'a str, &'a Element>,
    complex_types: HashMap<&'a str, &'a Element>,
}

impl<'a> Compiler<'a> {
    fn element(&self, node: &'a Element, depth: usize) -> Result<ElementDecl> {
        let name = node
            .attr("name")
            .ok_or_else(|| schema_err("xs:element without a name"))?;

        let min_occurs = match node.attr("minOccurs") {
            Some(v) => v
                .parse()
                .map_err(|_| schema_err(format!("bad minOccurs '{}' on {}", v, name)))?,
            None => 1,
        };
        let max_occurs = match node.attr("maxOccurs") {
            Some("unbounded") => None,
            Some(v) => Some(
                v.parse()
                    .map_err(|_| schema_err(format!("bad maxOccurs '{}' on {}", v, name)))?,
            ),
            None => Some(1),
        };

        let mut model = None;
        let mut uniques = Vec::new();

        if let Some(type_name) = node.attr("type") {
            model = Some(self.named_type(type_name, depth)?);
        }

        for child in &node.children {
            match local(&child.name) {
                "annotation" => {}
                "complexType" | "simpleType" if model.is_some() => {
                    return Err(schema_err(format!(
                        "element {} has both a type attribute and an inline type",
                        name
                    )))
                }
                "complexType" => model = Some(self.complex_type(child, depth + 1)?),
                "simpleType" => {
                    model = Some(ContentModel {
                        text: Some(self.simple_type(child, name, depth + 1)?),
                        ..ContentModel::default()
                    })
                }
                "unique" => uniques.push(unique_constraint(child, false)?),
                "key" => uniques.push(unique_constraint(child, true)?),
                other => {
                    return Err(schema_err(format!(
                        "unsupported xs:{} inside element {}",
                        other, name
                    )))
                }
            }
        }

        let model = model.ok_or_else(|| schema_err(format!("element {} has no type", name)))?;

        Ok(ElementDecl {
            name: name.to_string(),
            min_occurs,
            max_occurs,
            model,
            uniques,
        })
    }

    fn named_type(&self, type_name: &str, depth: usize) -> Result<ContentModel> {
        if !type_name.contains(':') {
            if let Some(def) = self.complex_types.get(type_name) {
                return self.complex_type(def, depth + 1);
            }
        }
        Ok(ContentModel {
            text: Some(self.simple_ref(type_name, depth)?),
            ..ContentModel::default()
        })
    }

    fn complex_type(&self, node: &'a Element, depth: usize) -> Result<ContentModel> {
        if depth > MAX_TYPE_DEPTH {
            return Err(schema_err("type definitions nest too deeply (recursive type?)"));
        }
        if node.attr("mixed") == Some("true") {
            return Err(schema_err("mixed content types are not supported"));
        }

        let mut model = ContentModel::default();
        for child in &node.children {
            match local(&child.name) {
                "annotation" => {}
                "sequence" => {
                    for particle in &child.children {
                        match local(&particle.name) {
                            "element" => model.children.push(self.element(particle, depth + 1)?),
                            "annotation" => {}
                            other => {
                                return Err(schema_err(format!(
                                    "unsupported xs:{} inside xs:sequence",
                                    other
                                )))
                            }
                        }
                    }
                }
                "attribute" => model.attributes.push(self.attribute(child, depth)?),
                "simpleContent" => {
                    let extension = child
                        .children
                        .iter()
                        .find(|c| local(&c.name) == "extension")
                        .ok_or_else(|| schema_err("xs:simpleContent requires xs:extension"))?;
                    let base = extension
                        .attr("base")
                        .ok_or_else(|| schema_err("xs:extension without base"))?;
                    model.text = Some(self.simple_ref(base, depth + 1)?);
                    for attr in &extension.children {
                        match local(&attr.name) {
                            "attribute" => model.attributes.push(self.attribute(attr, depth)?),
                            "annotation" => {}
                            other => {
                                return Err(schema_err(format!(
                                    "unsupported xs:{} inside xs:extension",
                                    other
                                )))
                            }
                        }
                    }
                }
                other => {
                    return Err(schema_err(format!(
                        "unsupported xs:{} inside xs:complexType",
                        other
                    )))
                }
            }
        }
        Ok(model)
    }

    fn attribute(&self, node: &'a Element, depth: usize) -> Result<AttributeDecl> {
        let name = node
            .attr("name")
            .ok_or_else(|| schema_err("xs:attribute without a name"))?;
        let required = match node.attr("use") {
            None | Some("optional") => false,
            Some("required") => true,
            Some(other) => {
                return Err(schema_err(format!(
                    "unsupported use='{}' on attribute {}",
                    other, name
                )))
            }
        };

        let ty = match node.attr("type") {
            Some(type_name) => self.simple_ref(type_name, depth + 1)?,
            None => match node.children.iter().find(|c| local(&c.name) == "simpleType") {
                Some(inline) => self.simple_type(inline, name, depth + 1)?,
                None => SimpleType::builtin("xs:string", BuiltIn::String),
            },
        };

        Ok(AttributeDecl {
            name: name.to_string(),
            ty,
            required,
        })
    }

    fn simple_ref(&self, type_name: &str, depth: usize) -> Result<SimpleType> {
        if depth > MAX_TYPE_DEPTH {
            return Err(schema_err("type definitions nest too deeply (recursive type?)"));
        }
        if type_name.contains(':') {
            let builtin = BuiltIn::from_local(local(type_name)).ok_or_else(|| {
                schema_err(format!("unsupported built-in type '{}'", type_name))
            })?;
            return Ok(SimpleType::builtin(type_name, builtin));
        }
        let def = self
            .simple_types
            .get(type_name)
            .ok_or_else(|| schema_err(format!("unknown simple type '{}'", type_name)))?;
        self.simple_type(def, type_name, depth + 1)
    }

    fn simple_type(&self, node: &'a Element, name: &str, depth: usize) -> Result<SimpleType> {
        let restriction = node
            .children
            .iter()
            .find(|c| local(&c.name) == "restriction")
            .ok_or_else(|| schema_err(format!("simple type {} must be an xs:restriction", name)))?;
        let base = restriction
            .attr("base")
            .ok_or_else(|| schema_err(format!("xs:restriction without base in {}", name)))?;

        let mut ty = self.simple_ref(base, depth + 1)?;
        ty.name = name.to_string();

        for facet in &restriction.children {
            let facet_name = local(&facet.name);
            if facet_name == "annotation" {
                continue;
            }
            let value = facet
                .attr("value")
                .ok_or_else(|| schema_err(format!("facet xs:{} without value", facet_name)))?;
            let bad = || schema_err(format!("bad value '{}' for xs:{}", value, facet_name));
            match facet_name {
                "enumeration" => ty.enumeration.push(value.to_string()),
                "minLength" => ty.min_length = Some(value.parse().map_err(|_| bad())?),
                "maxLength" => ty.max_length = Some(value.parse().map_err(|_| bad())?),
                "length" => {
                    let n = value.parse().map_err(|_| bad())?;
                    ty.min_length = Some(n);
                    ty.max_length = Some(n);
                }
                "minInclusive" | "maxInclusive" if !ty.base.is_numeric() => {
                    return Err(schema_err(format!(
                        "xs:{} requires a numeric base in {}",
                        facet_name, name
                    )))
                }
                "minInclusive" => ty.min_inclusive = Some(value.parse().map_err(|_| bad())?),
                "maxInclusive" => ty.max_inclusive = Some(value.parse().map_err(|_| bad())?),
                other => {
                    return Err(schema_err(format!(
                        "unsupported facet xs:{} in {}",
                        other, name
                    )))
                }
            }
        }
        Ok(ty)
    }
}

fn unique_constraint(node: &Element, is_key: bool) -> Result<UniqueConstraint> {
    let name = node.attr("name").unwrap_or("unnamed").to_string();

    let selector_path = node
        .children
        .iter()
        .find(|c| local(&c.name) == "selector")
        .and_then(|s| s.attr("xpath"))
        .ok_or_else(|| schema_err(format!("constraint {} has no selector", name)))?;

    let mut selector = Vec::new();
    for step in selector_path.split('/') {
        match step.trim() {
            "." => {}
            "" | ".." | "*" => {
                return Err(schema_err(format!(
                    "unsupported selector '{}' in constraint {}",
                    selector_path, name
                )))
            }
            step if step.contains(['@', '[', '(']) => {
                return Err(schema_err(format!(
                    "unsupported selector '{}' in constraint {}",
                    selector_path, name
                )))
            }
            step => selector.push(local(step).to_string()),
        }
    }
    if selector.is_empty() {
        return Err(schema_err(format!("empty selector in constraint {}", name)));
    }

    let mut fields = Vec::new();
    for field in node.children.iter().filter(|c| local(&c.name) == "field") {
        let xpath = field
            .attr("xpath")
            .ok_or_else(|| schema_err(format!("field without xpath in {}", name)))?
            .trim();
        let parsed = match xpath.strip_prefix('@') {
            Some(attr) => Field::Attribute(attr.to_string()),
            None if xpath.chars().all(|c| c.is_alphanumeric() || "_-:".contains(c)) => {
                Field::Child(local(xpath).to_string())
            }
            None => {
                return Err(schema_err(format!(
                    "unsupported field '{}' in constraint {}",
                    xpath, name
                )))
            }
        };
        fields.push(parsed);
    }
    if fields.is_empty() {
        return Err(schema_err(format!("constraint {} has no fields", name)));
    }

    Ok(UniqueConstraint {
        name,
        is_key,
        selector,
        fields,
    })
}

impl Schema {
    /// Compile an XSD document.
    pub fn compile(xsd: &str) -> Result<Schema> {
        let doc = Element::parse(xsd)?;
        if local(&doc.name) != "schema" {
            return Err(schema_err(format!(
                "expected xs:schema root, found <{}>",
                doc.name
            )));
        }

        let mut compiler = Compiler {
            simple_types: HashMap::new(),
            complex_types: HashMap::new(),
        };
        let mut roots = Vec::new();

        for child in &doc.children {
            match local(&child.name) {
                "simpleType" | "complexType" => {
                    let name = child
                        .attr("name")
                        .ok_or_else(|| schema_err("top-level type without a name"))?;
                    let table = if local(&child.name) == "simpleType" {
                        &mut compiler.simple_types
                    } else {
                        &mut compiler.complex_types
                    };
                    if table.insert(name, child).is_some() {
                        return Err(schema_err(format!("type {} defined twice", name)));
                    }
                }
                "element" => roots.push(child),
                "annotation" => {}
                other => {
                    return Err(schema_err(format!(
                        "unsupported top-level xs:{}",
                        other
                    )))
                }
            }
        }

        let root = match roots.as_slice() {
            [root] => compiler.element(root, 0)?,
            [] => return Err(schema_err("schema declares no top-level element")),
            _ => return Err(schema_err("schema must declare exactly one top-level element")),
        };

        Ok(Schema { root })
    }

    /// The schema shipped with the store.
    pub fn builtin() -> Result<Schema> {
        Schema::compile(BUILTIN_XSD)
    }

    /// Name of the document element this schema accepts.
    pub fn root_name(&self) -> &str {
        &self.root.name
    }

    /// Validate a document, collecting every violation.
    pub fn validate(&self, root: &Element) -> std::result::Result<(), ValidationReport> {
        let mut report = ValidationReport::default();
        let path = format!("/{}", root.name);
        if root.name != self.root.name {
            report.push(
                &path,
                format!("expected root element <{}>", self.root.name),
            );
        } else {
            validate_element(&self.root, root, &path, &mut report);
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(report)
        }
    }

    /// Validate and convert the report into a store error.
    pub fn check(&self, root: &Element) -> Result<()> {
        self.validate(root).map_err(StoreError::Invalid)
    }
}

fn validate_element(decl: &ElementDecl, el: &Element, path: &str, report: &mut ValidationReport) {
    let model = &decl.model;

    for attr in &model.attributes {
        match el.attr(&attr.name) {
            Some(value) => {
                if let Err(msg) = attr.ty.check(value) {
                    report.push(&format!("{}/@{}", path, attr.name), msg);
                }
            }
            None if attr.required => {
                report.push(path, format!("missing required attribute '{}'", attr.name))
            }
            None => {}
        }
    }
    for (key, _) in &el.attributes {
        let declared = model.attributes.iter().any(|a| a.name == *key);
        if !declared && !key.starts_with("xmlns") && !key.starts_with("xsi:") {
            report.push(path, format!("unexpected attribute '{}'", key));
        }
    }

    match &model.text {
        Some(ty) => {
            if !el.children.is_empty() {
                report.push(path, "element must not contain child elements");
            }
            if let Err(msg) = ty.check(el.text.as_deref().unwrap_or("")) {
                report.push(path, msg);
            }
        }
        None => {
            if el.text.as_deref().is_some_and(|t| !t.trim().is_empty()) {
                report.push(path, "unexpected text content");
            }
        }
    }

    if model.text.is_none() {
        validate_children(model, el, path, report);
    }

    for constraint in &decl.uniques {
        check_unique(constraint, el, path, report);
    }
}

fn validate_children(model: &ContentModel, el: &Element, path: &str, report: &mut ValidationReport) {
    let mut idx = 0;
    for child_decl in &model.children {
        let mut count = 0u32;
        while idx < el.children.len()
            && el.children[idx].name == child_decl.name
            && child_decl.max_occurs.map_or(true, |max| count < max)
        {
            count += 1;
            let child_path = if child_decl.max_occurs == Some(1) {
                format!("{}/{}", path, child_decl.name)
            } else {
                format!("{}/{}[{}]", path, child_decl.name, count)
            };
            validate_element(child_decl, &el.children[idx], &child_path, report);
            idx += 1;
        }
        if count < child_decl.min_occurs {
            report.push(
                path,
                format!(
                    "expected at least {} <{}> element(s), found {}",
                    child_decl.min_occurs, child_decl.name, count
                ),
            );
        }
    }

    if let Some(extra) = el.children.get(idx) {
        let message = match model.children.iter().find(|d| d.name == extra.name) {
            Some(d) if d.max_occurs.is_some_and(|max| {
                el.children.iter().filter(|c| c.name == extra.name).count() > max as usize
            }) => format!(
                "more than {} <{}> element(s)",
                d.max_occurs.unwrap_or_default(),
                extra.name
            ),
            Some(_) => format!("<{}> is out of order", extra.name),
            None => format!("unexpected element <{}>", extra.name),
        };
        report.push(path, message);
    }
}

fn select<'e>(el: &'e Element, steps: &[String]) -> Vec<&'e Element> {
    let mut current = vec![el];
    for step in steps {
        current = current
            .into_iter()
            .flat_map(|node| node.children.iter().filter(move |c| c.name == *step))
            .collect();
    }
    current
}

fn check_unique(constraint: &UniqueConstraint, el: &Element, path: &str, report: &mut ValidationReport) {
    let mut seen: HashSet<Vec<&str>> = HashSet::new();

    for node in select(el, &constraint.selector) {
        let values: Option<Vec<&str>> = constraint
            .fields
            .iter()
            .map(|field| match field {
                Field::Attribute(name) => node.attr(name),
                Field::Child(name) => node.child_text(name),
            })
            .collect();

        let Some(values) = values else {
            if constraint.is_key {
                report.push(
                    path,
                    format!(
                        "<{}> is missing a field of key '{}'",
                        node.name, constraint.name
                    ),
                );
            }
            continue;
        };

        if !seen.insert(values.clone()) {
            report.push(
                path,
                format!(
                    "duplicate value ({}) for constraint '{}'",
                    values.join(", "),
                    constraint.name
                ),
            );
        }
    }
}
