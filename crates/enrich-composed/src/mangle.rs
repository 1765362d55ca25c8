//! Id mangling.
//!
//! A composed component's id is *conformed*: made structured (a simple id
//! `x` becomes `{"id": x}`) and tagged with its class under [`TYPE_NAME`].
//! Its children's ids are *wrapped*: every child key is prefixed with one
//! more [`CHILD_MARKER`] than the parent's deepest key, then the parent's
//! keys are merged in unchanged. Depth of nesting is therefore readable from
//! the keys while the id stays a flat map:
//!
//! ```text
//! F(id="my-base-f")                 {"class":"F","id":"my-base-f"}
//! └─ Label(id="label")              {"*id":"label","class":"F","id":"my-base-f"}
//! └─ F(id="inner")                  {"*class":"F","*id":"inner","class":"F","id":"my-base-f"}
//!    └─ Label(id="label")           {"**id":"label","*class":"F","*id":"inner",...}
//! ```
//!
//! The *generic* form of an id replaces every concrete value except class
//! tags by `MATCH`, so one callback declaration serves every instance.

use enrich_kernel::{ComponentId, EnrichError, IdValue, MATCH, StructuredId};

pub const TYPE_NAME: &str = "class";
pub const CHILD_MARKER: char = '*';
/// The id composed callbacks use to refer to their own component.
pub const SELF: &str = "self";

/// Key of a simple id once made structured.
const SIMPLE_KEY: &str = "id";

fn depth(key: &str) -> usize {
    key.chars().take_while(|c| *c == CHILD_MARKER).count()
}

/// `class`, `*class`, `**class`, ...
pub fn is_class_key(key: &str) -> bool {
    key.trim_start_matches(CHILD_MARKER) == TYPE_NAME
}

pub fn is_self(id: &ComponentId) -> bool {
    id.as_simple() == Some(SELF)
}

/// Structured id of a composed component of `class`.
pub fn conform(class: &str, id: &ComponentId) -> Result<StructuredId, EnrichError> {
    let mut conformed = id.to_structured(SIMPLE_KEY);
    if conformed.contains_key(TYPE_NAME) {
        return Err(EnrichError::invalid_composed(
            class,
            format!("id {id} uses the reserved key '{TYPE_NAME}'"),
        ));
    }
    conformed.insert(TYPE_NAME, class);
    Ok(conformed)
}

/// Replace every concrete value except class tags by `MATCH`.
pub fn make_generic(id: &StructuredId) -> StructuredId {
    id.iter()
        .map(|(key, value)| {
            if is_class_key(key) || value.is_wildcard() {
                (key, value.clone())
            } else {
                (key, IdValue::from(MATCH))
            }
        })
        .collect()
}

/// Child id as seen from the root, given its parent's id.
///
/// With `match_parent` the parent part is made generic. An empty parent
/// (the root) leaves the child keys unprefixed.
pub fn wrap_child_id(parent: &StructuredId, child: &ComponentId, match_parent: bool) -> StructuredId {
    let level = parent.keys().map(depth).max().map_or(0, |deepest| deepest + 1);
    let marker = CHILD_MARKER.to_string().repeat(level);
    let mut wrapped: StructuredId = child
        .to_structured(SIMPLE_KEY)
        .iter()
        .map(|(key, value)| (format!("{marker}{key}"), value.clone()))
        .collect();
    if match_parent {
        wrapped.extend_from(&make_generic(parent));
    } else {
        wrapped.extend_from(parent);
    }
    wrapped
}

/// Split a wrapped id into its parent part and the child's own id.
/// `None` for ids that carry no child marker.
pub fn unwrap_child_id(id: &StructuredId) -> Option<(StructuredId, ComponentId)> {
    let level = id.keys().map(depth).max()?;
    if level == 0 {
        return None;
    }
    let parent = id.without_keys(|key, _| depth(key) == level);
    let child: StructuredId = id
        .iter()
        .filter(|(key, _)| depth(key) == level)
        .map(|(key, value)| (&key[level..], value.clone()))
        .collect();
    let child = match child.get(SIMPLE_KEY) {
        Some(IdValue::Str(simple)) if child.len() == 1 => ComponentId::Simple(simple.clone()),
        _ => ComponentId::Structured(child),
    };
    Some((parent, child))
}

/// `local` qualified under `base`; at the root (empty base) ids stay as
/// they are.
pub fn qualify(base: &StructuredId, local: &ComponentId) -> ComponentId {
    if base.is_empty() {
        local.clone()
    } else {
        ComponentId::Structured(wrap_child_id(base, local, false))
    }
}

/// Like [`qualify`], for ids that are already structured (conformed ids).
pub fn nest(base: &StructuredId, local: StructuredId) -> StructuredId {
    if base.is_empty() {
        local
    } else {
        wrap_child_id(base, &ComponentId::Structured(local), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_kernel::ALL;

    fn sid(pairs: &[(&str, IdValue)]) -> StructuredId {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    fn s(value: &str) -> IdValue {
        IdValue::from(value)
    }

    #[test]
    fn generic_ids_keep_class_tags_and_wildcards() {
        assert_eq!(make_generic(&sid(&[("id", s("p"))])), sid(&[("id", MATCH.into())]));
        assert_eq!(make_generic(&sid(&[("id", ALL.into())])), sid(&[("id", ALL.into())]));
        assert_eq!(
            make_generic(&sid(&[("id", ALL.into()), ("*class", s("F")), ("class", s("G"))])),
            sid(&[("id", ALL.into()), ("*class", s("F")), ("class", s("G"))])
        );
    }

    #[test]
    fn wrapping_prefixes_child_keys_one_level_deeper() {
        let parent = sid(&[("id", s("p"))]);
        assert_eq!(
            wrap_child_id(&parent, &"c".into(), false),
            sid(&[("*id", s("c")), ("id", s("p"))])
        );
        assert_eq!(
            wrap_child_id(&parent, &"c".into(), true),
            sid(&[("*id", s("c")), ("id", MATCH.into())])
        );

        let structured = ComponentId::from(StructuredId::new().with("index", "c").with("type", "test"));
        let level_one = wrap_child_id(&sid(&[("id", ALL.into())]), &structured, true);
        assert_eq!(
            wrap_child_id(&level_one, &"foo".into(), false),
            sid(&[
                ("**id", s("foo")),
                ("*index", s("c")),
                ("*type", s("test")),
                ("id", ALL.into()),
            ])
        );

        let level_one = wrap_child_id(&parent, &structured, true);
        assert_eq!(
            wrap_child_id(&level_one, &"foo".into(), true),
            sid(&[
                ("**id", s("foo")),
                ("*index", MATCH.into()),
                ("*type", MATCH.into()),
                ("id", MATCH.into()),
            ])
        );
    }

    #[test]
    fn unwrapping_recovers_the_child_id() {
        let parent = sid(&[("class", s("F")), ("id", s("p"))]);
        for child in [
            ComponentId::from("label"),
            ComponentId::from(StructuredId::new().with("index", 3).with("type", "row")),
            ComponentId::from(StructuredId::new().with("index", ALL)),
        ] {
            let wrapped = wrap_child_id(&parent, &child, false);
            let (recovered_parent, recovered_child) =
                unwrap_child_id(&wrapped).expect("wrapped id should unwrap");
            assert_eq!(recovered_parent, parent);
            assert_eq!(recovered_child, child);
        }
        assert!(unwrap_child_id(&parent).is_none());
    }

    #[test]
    fn conform_tags_the_class_and_rejects_the_reserved_key() {
        assert_eq!(
            conform("A", &"foo".into()).expect("conform"),
            sid(&[("class", s("A")), ("id", s("foo"))])
        );
        let structured = ComponentId::from(StructuredId::new().with("type", "A").with("index", "foo"));
        assert_eq!(
            conform("A", &structured).expect("conform"),
            sid(&[("class", s("A")), ("index", s("foo")), ("type", s("A"))])
        );
        let reserved = ComponentId::from(StructuredId::new().with("class", "x"));
        assert!(matches!(
            conform("A", &reserved),
            Err(EnrichError::InvalidComposed { .. })
        ));
    }

    #[test]
    fn root_ids_are_left_alone() {
        assert_eq!(qualify(&StructuredId::new(), &"foo".into()), ComponentId::from("foo"));
    }
}
