//! Declarative attribute vocabulary
//!
//! These names are the contract between markup and the binding engine and
//! must match exactly.

/// Replace the element's text content
pub const TEXT: &str = "data-text";
/// Toggle visibility (the `hidden` attribute) by truthiness
pub const SHOW: &str = "data-show";
/// Toggle class membership
pub const CLASS: &str = "data-class";
/// Two-way value sync for form controls
pub const VALUE: &str = "data-value";
/// Two-way checked sync for checkboxes and radios
pub const CHECKED: &str = "data-checked";
/// Render a sequence through the element's item template
pub const LIST: &str = "data-list";
/// Per-item key expression, mirrored to `data-key` on each instance
pub const LIST_KEY: &str = "data-list-key";
/// Render the list once, never rebuild it
pub const LIST_ONCE: &str = "data-list-once";
/// Synonym of [`LIST_ONCE`]
pub const LIST_STATIC: &str = "data-list-static";
/// Marks the item template inside a list-bound element
pub const ITEM: &str = "data-item";
/// `data-attr-<name>`: mirror an expression into attribute `<name>`
pub const ATTR_PREFIX: &str = "data-attr-";
/// `data-arg-<name>`: surface an expression into the element's args
pub const ARG_PREFIX: &str = "data-arg-";

/// Attribute stamped on list instances carrying their key
pub const KEY: &str = "data-key";
/// Attribute toggled by [`SHOW`]
pub const HIDDEN: &str = "hidden";

/// Tag of the item template element
pub const TEMPLATE_TAG: &str = "template";

/// Whether an attribute belongs to the binding vocabulary
pub fn is_directive(name: &str) -> bool {
    matches!(
        name,
        TEXT | SHOW | CLASS | VALUE | CHECKED | LIST | LIST_KEY | LIST_ONCE | LIST_STATIC | ITEM
    ) || name.starts_with(ATTR_PREFIX)
        || name.starts_with(ARG_PREFIX)
}
