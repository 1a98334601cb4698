//! Claim-set XML parsing (spec.md §4.2). XML well-formedness is a leaf
//! concern handled by `roxmltree`; this module owns the claims-specific
//! structure and validation rules, matching `evr_parse_file_claim` and
//! friends in `examples/original_source/src/claims.c`.

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

use crate::error::ClaimParseError;
use crate::model::BlobRef;

use super::model::{
    AttrClaim, AttrDef, AttrFactory, AttrOp, AttrOperation, AttrSpecClaim, AttrTarget, AttrValueType,
    Claim, ClaimSet, FileClaim, FileSlice, MAX_SLICE_SIZE, Transformation,
};

pub const CLAIMS_NS: &str = "https://evr.ma300k.de/claims/";
pub const DC_NS: &str = "http://purl.org/dc/terms/";

/// Parses a complete claim-set XML document.
pub fn parse_claim_set(xml: &str) -> Result<ClaimSet, ClaimParseError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    if !is_claims_element(&root, "claim-set") {
        return Err(ClaimParseError::NotAClaimSet);
    }

    let created = parse_created(&root)?;

    let mut claims = Vec::new();
    for (i, child) in element_children(&root).enumerate() {
        claims.push(parse_claim(&child, i as u16)?);
    }

    Ok(ClaimSet { created, claims })
}

fn is_claims_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name && node.tag_name().namespace() == Some(CLAIMS_NS)
}

fn element_children<'a, 'input>(node: &'a Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn parse_created(root: &Node) -> Result<DateTime<Utc>, ClaimParseError> {
    let raw = root
        .attribute((DC_NS, "created"))
        .ok_or(ClaimParseError::MissingAttribute {
            elem: "claim-set",
            attr: "dc:created",
        })?;

    // spec.md §3: "YYYY-MM-DDThh:mm:ssZ", trailing content fails the parse.
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .filter(|_| raw.ends_with('Z') && raw.len() == "YYYY-MM-DDThh:mm:ssZ".len())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ClaimParseError::BadTimestamp(raw.to_string()))
}

fn parse_claim(node: &Node, claim_index: u16) -> Result<Claim, ClaimParseError> {
    match node.tag_name().name() {
        "file" => Ok(Claim::File(parse_file_claim(node)?)),
        "attr" => Ok(Claim::Attr(parse_attr_claim(node, claim_index)?)),
        "attr-spec" => Ok(Claim::AttrSpec(parse_attr_spec_claim(node)?)),
        other => Err(ClaimParseError::UnknownClaimElement(other.to_string())),
    }
}

fn parse_file_claim(node: &Node) -> Result<FileClaim, ClaimParseError> {
    let title = node.attribute((DC_NS, "title")).map(str::to_string);

    let body = element_children(node)
        .find(|n| is_claims_element(n, "body"));

    let mut slices = Vec::new();
    if let Some(body) = body {
        for slice in element_children(&body).filter(|n| is_claims_element(n, "slice")) {
            slices.push(parse_slice(&slice)?);
        }
    }

    Ok(FileClaim { title, slices })
}

fn parse_slice(node: &Node) -> Result<FileSlice, ClaimParseError> {
    let ref_raw = node
        .attribute("ref")
        .ok_or(ClaimParseError::MissingAttribute {
            elem: "slice",
            attr: "ref",
        })?;
    let ref_ = ref_raw
        .parse::<BlobRef>()
        .map_err(|_| ClaimParseError::BadSliceRef(ref_raw.to_string()))?;

    let size_raw = node
        .attribute("size")
        .ok_or(ClaimParseError::MissingAttribute {
            elem: "slice",
            attr: "size",
        })?;
    let size = size_raw
        .parse::<u64>()
        .map_err(|_| ClaimParseError::BadSliceSize(size_raw.to_string()))?;
    if size >= MAX_SLICE_SIZE {
        return Err(ClaimParseError::SliceTooLarge { size });
    }

    Ok(FileSlice { ref_, size })
}

fn parse_attr_claim(node: &Node, claim_index: u16) -> Result<AttrClaim, ClaimParseError> {
    let target = match node.attribute("ref") {
        Some(raw) => {
            let claim_ref = raw
                .parse()
                .map_err(|_| ClaimParseError::BadSliceRef(raw.to_string()))?;
            AttrTarget::Ref(claim_ref)
        }
        None => {
            // Absent `ref` means the target is the enclosing claim-set;
            // an absent `claim` attribute defaults to this attr claim's
            // own index (see SPEC_FULL.md §C.1).
            let self_index = match node.attribute("claim") {
                Some(raw) => raw
                    .parse::<u16>()
                    .map_err(|_| ClaimParseError::BadSliceSize(raw.to_string()))?,
                None => claim_index,
            };
            AttrTarget::SelfClaim {
                claim_index: self_index,
            }
        }
    };

    let mut operations = Vec::new();
    for a in element_children(node).filter(|n| is_claims_element(n, "a")) {
        operations.push(parse_attr_operation(&a)?);
    }

    Ok(AttrClaim { target, operations })
}

fn parse_attr_operation(node: &Node) -> Result<AttrOperation, ClaimParseError> {
    let op_raw = node.attribute("op").ok_or(ClaimParseError::MissingAttribute {
        elem: "a",
        attr: "op",
    })?;
    let op_char = op_raw
        .chars()
        .next()
        .filter(|_| op_raw.chars().count() == 1)
        .ok_or_else(|| ClaimParseError::UnknownOp {
            elem: "a",
            op: op_raw.to_string(),
        })?;
    let op = AttrOp::from_char(op_char).ok_or_else(|| ClaimParseError::UnknownOp {
        elem: "a",
        op: op_raw.to_string(),
    })?;

    let key = node
        .attribute("k")
        .ok_or(ClaimParseError::MissingAttribute {
            elem: "a",
            attr: "k",
        })?
        .to_string();

    let value = node.attribute("v").map(str::to_string);
    if op != AttrOp::Remove && value.is_none() {
        return Err(ClaimParseError::MissingOpValue {
            op: op.as_char(),
            key,
        });
    }

    Ok(AttrOperation { op, key, value })
}

fn parse_attr_spec_claim(node: &Node) -> Result<AttrSpecClaim, ClaimParseError> {
    let mut attr_defs = Vec::new();
    for def in element_children(node).filter(|n| is_claims_element(n, "attr-def")) {
        let key = def
            .attribute("k")
            .ok_or(ClaimParseError::MissingAttribute {
                elem: "attr-def",
                attr: "k",
            })?
            .to_string();
        let type_raw = def.attribute("type").unwrap_or("str");
        let value_type = match type_raw {
            "str" => AttrValueType::Str,
            "int" => AttrValueType::Int,
            other => return Err(ClaimParseError::UnknownAttrType(other.to_string())),
        };
        attr_defs.push(AttrDef { key, value_type });
    }

    let mut attr_factories = Vec::new();
    for factory in element_children(node).filter(|n| is_claims_element(n, "attr-factory")) {
        if factory.attribute("type") != Some("executable") {
            return Err(ClaimParseError::UnsupportedAttrFactory);
        }
        let blob_raw = factory
            .attribute("blob")
            .ok_or(ClaimParseError::MissingAttribute {
                elem: "attr-factory",
                attr: "blob",
            })?;
        let executable_blob = blob_raw
            .parse::<BlobRef>()
            .map_err(|_| ClaimParseError::BadSliceRef(blob_raw.to_string()))?;
        attr_factories.push(AttrFactory { executable_blob });
    }

    let transformation_node = element_children(node)
        .find(|n| is_claims_element(n, "transformation"))
        .ok_or(ClaimParseError::MissingTransformation)?;
    if transformation_node.attribute("type") != Some("xslt") {
        return Err(ClaimParseError::UnsupportedTransformation);
    }
    let blob_raw = transformation_node
        .attribute("blob")
        .ok_or(ClaimParseError::MissingAttribute {
            elem: "transformation",
            attr: "blob",
        })?;
    let stylesheet_blob = blob_raw
        .parse::<BlobRef>()
        .map_err(|_| ClaimParseError::BadSliceRef(blob_raw.to_string()))?;

    Ok(AttrSpecClaim {
        attr_defs,
        attr_factories,
        transformation: Transformation { stylesheet_blob },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ref() -> String {
        "a".repeat(64)
    }

    #[test]
    fn parses_created_timestamp() {
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z"></claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS
        );
        let cs = parse_claim_set(&xml).unwrap();
        assert_eq!(cs.created.to_rfc3339(), "2022-01-02T03:04:05+00:00");
        assert!(cs.claims.is_empty());
    }

    #[test]
    fn rejects_non_claim_set_root() {
        let xml = format!(r#"<nope xmlns="{ns}"></nope>"#, ns = CLAIMS_NS);
        let err = parse_claim_set(&xml).unwrap_err();
        assert!(matches!(err, ClaimParseError::NotAClaimSet));
    }

    #[test]
    fn rejects_missing_created() {
        let xml = format!(r#"<claim-set xmlns="{ns}"></claim-set>"#, ns = CLAIMS_NS);
        let err = parse_claim_set(&xml).unwrap_err();
        assert!(matches!(err, ClaimParseError::MissingAttribute { .. }));
    }

    #[test]
    fn parses_file_claim_with_slices_round_trip() {
        let r = sample_ref();
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <file dc:title="hello.txt">
                   <body>
                     <slice ref="{r}" size="10" />
                   </body>
                 </file>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS,
            r = r
        );
        let cs = parse_claim_set(&xml).unwrap();
        assert_eq!(cs.claims.len(), 1);
        match &cs.claims[0] {
            Claim::File(f) => {
                assert_eq!(f.title.as_deref(), Some("hello.txt"));
                assert_eq!(f.slices.len(), 1);
                assert_eq!(f.slices[0].size, 10);
            }
            _ => panic!("expected file claim"),
        }
    }

    #[test]
    fn rejects_slice_at_size_limit() {
        let r = sample_ref();
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <file><body><slice ref="{r}" size="104857600" /></body></file>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS,
            r = r
        );
        let err = parse_claim_set(&xml).unwrap_err();
        assert!(matches!(err, ClaimParseError::SliceTooLarge { .. }));
    }

    #[test]
    fn attr_claim_self_target_defaults_to_own_index() {
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <attr><a op="+" k="color" v="red" /></attr>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS
        );
        let cs = parse_claim_set(&xml).unwrap();
        match &cs.claims[0] {
            Claim::Attr(a) => {
                assert_eq!(a.target, AttrTarget::SelfClaim { claim_index: 0 });
                assert_eq!(a.operations[0].op, AttrOp::Add);
                assert_eq!(a.operations[0].value.as_deref(), Some("red"));
            }
            _ => panic!("expected attr claim"),
        }
    }

    #[test]
    fn remove_op_without_value_is_allowed() {
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <attr><a op="-" k="color" /></attr>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS
        );
        let cs = parse_claim_set(&xml).unwrap();
        match &cs.claims[0] {
            Claim::Attr(a) => assert_eq!(a.operations[0].value, None),
            _ => panic!("expected attr claim"),
        }
    }

    #[test]
    fn replace_op_without_value_is_rejected() {
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <attr><a op="=" k="color" /></attr>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS
        );
        let err = parse_claim_set(&xml).unwrap_err();
        assert!(matches!(err, ClaimParseError::MissingOpValue { .. }));
    }

    #[test]
    fn parses_attr_spec_claim() {
        let r = sample_ref();
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <attr-spec>
                   <attr-def k="color" type="str" />
                   <attr-def k="count" type="int" />
                   <transformation type="xslt" blob="{r}" />
                 </attr-spec>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS,
            r = r
        );
        let cs = parse_claim_set(&xml).unwrap();
        let spec = cs.attr_spec().unwrap();
        assert_eq!(spec.attr_defs.len(), 2);
        assert_eq!(spec.attr_defs[1].value_type, AttrValueType::Int);
    }

    #[test]
    fn attr_spec_without_transformation_is_rejected() {
        let xml = format!(
            r#"<claim-set xmlns="{ns}" xmlns:dc="{dc}" dc:created="2022-01-02T03:04:05Z">
                 <attr-spec></attr-spec>
               </claim-set>"#,
            ns = CLAIMS_NS,
            dc = DC_NS
        );
        let err = parse_claim_set(&xml).unwrap_err();
        assert!(matches!(err, ClaimParseError::MissingTransformation));
    }
}
