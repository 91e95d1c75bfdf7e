#![forbid(unsafe_code)]

//! Render phase, bottom-up half.
//!
//! New host fibers get their host object here, with initial properties set
//! and every host child already appended, so a whole new subtree is attached
//! by one placement at commit. Updated host fibers get a property diff that
//! the commit pass applies. Every fiber then folds its children's lanes and
//! flags into its own `child_lanes` / `subtree_flags`.

use tracing::trace;

use crate::begin_work::RenderScope;
use crate::element::{PropValue, Props};
use crate::error::Result;
use crate::fiber::{FiberArena, FiberId, FiberTag, PropChange};
use crate::flags::Flags;
use crate::host::{Host, HostHandle};
use crate::lanes::Lanes;

impl RenderScope<'_> {
    pub(crate) fn complete_work<H: Host>(
        &mut self,
        host: &mut H,
        current: Option<FiberId>,
        wip: FiberId,
    ) -> Result<()> {
        let tag = self.arena.get(wip)?.tag.clone();
        match tag {
            FiberTag::Host { tag, .. } => {
                let (props, handle) = {
                    let fiber = self.arena.get(wip)?;
                    (fiber.pending_props.clone(), fiber.host_handle)
                };
                match (current, handle) {
                    (Some(current), Some(_)) => {
                        let previous = self.arena.get(current)?.memoized_props.clone().unwrap_or_default();
                        let payload = diff_properties(&previous, &props);
                        if !payload.is_empty() {
                            trace!(fiber = ?wip, changes = payload.len(), "host update queued");
                            let fiber = self.arena.get_mut(wip)?;
                            fiber.tag = FiberTag::Host {
                                tag,
                                update_payload: Some(payload),
                            };
                            fiber.flags |= Flags::UPDATE;
                        }
                    }
                    _ => {
                        let handle = host.create_host_object(&tag)?;
                        set_initial_properties(host, handle, &props)?;
                        append_all_children(self.arena, host, handle, wip)?;
                        self.arena.get_mut(wip)?.host_handle = Some(handle);
                    }
                }
            }
            FiberTag::Text { text } => {
                let handle = self.arena.get(wip)?.host_handle;
                match (current, handle) {
                    (Some(current), Some(_)) => {
                        let changed = self.arena.get(current)?.text() != Some(&*text);
                        if changed {
                            self.arena.get_mut(wip)?.flags |= Flags::UPDATE;
                        }
                    }
                    _ => {
                        let handle = host.create_text_object(&text)?;
                        self.arena.get_mut(wip)?.host_handle = Some(handle);
                    }
                }
            }
            FiberTag::Provider { provider } => self.contexts.pop(&provider.context),
            FiberTag::Root { .. }
            | FiberTag::Function { .. }
            | FiberTag::Class { .. }
            | FiberTag::Fragment
            | FiberTag::Memo { .. }
            | FiberTag::SimpleMemo { .. } => {}
        }
        bubble_properties(self.arena, current, wip)
    }
}

fn set_initial_properties<H: Host>(host: &mut H, handle: HostHandle, props: &Props) -> Result<()> {
    for (key, value) in props.attrs() {
        if !value.is_null() {
            host.set_property(handle, key, value)?;
        }
    }
    if let Some(text) = props.children().as_text() {
        host.set_text_content(handle, text)?;
    }
    Ok(())
}

/// Changes turning `previous` into `next`: removed keys first, then changed
/// or added keys in `next` order, then direct text.
pub(crate) fn diff_properties(previous: &Props, next: &Props) -> Vec<PropChange> {
    let mut changes = Vec::new();
    if previous.ptr_eq(next) {
        return changes;
    }
    for (key, _) in previous.attrs() {
        if next.get(key).is_none() {
            changes.push(PropChange::Set(key.into(), PropValue::Null));
        }
    }
    for (key, value) in next.attrs() {
        let unchanged = previous.get(key).is_some_and(|old| old.is_same(value));
        if !unchanged {
            changes.push(PropChange::Set(key.into(), value.clone()));
        }
    }
    let old_text = previous.children().as_text();
    let new_text = next.children().as_text();
    if old_text != new_text {
        changes.push(PropChange::Text(new_text.cloned().unwrap_or_else(|| "".into())));
    }
    changes
}

/// Append the top-level host objects below `fiber` to `parent`.
fn append_all_children<H: Host>(
    arena: &FiberArena,
    host: &mut H,
    parent: HostHandle,
    fiber: FiberId,
) -> Result<()> {
    let mut next = arena.get(fiber)?.child;
    while let Some(child) = next {
        let node = arena.get(child)?;
        if node.is_host() {
            if let Some(handle) = node.host_handle {
                host.append_child(parent, handle)?;
            }
        } else if node.child.is_some() {
            append_all_children(arena, host, parent, child)?;
        }
        next = node.sibling;
    }
    Ok(())
}

/// Fold children's lanes and flags into `wip`.
///
/// When the fiber bailed out its children are the committed ones; their
/// flags were consumed by an earlier commit and are not bubbled.
fn bubble_properties(arena: &mut FiberArena, current: Option<FiberId>, wip: FiberId) -> Result<()> {
    let first = arena.get(wip)?.child;
    let did_bailout = match current {
        Some(current) => arena.get(current)?.child == first,
        None => false,
    };

    let mut child_lanes = Lanes::NONE;
    let mut subtree_flags = Flags::empty();
    let mut next = first;
    while let Some(child) = next {
        let fiber = arena.get_mut(child)?;
        child_lanes |= fiber.lanes | fiber.child_lanes;
        if !did_bailout {
            subtree_flags |= fiber.subtree_flags | fiber.flags;
            fiber.parent = Some(wip);
        }
        next = fiber.sibling;
    }

    let fiber = arena.get_mut(wip)?;
    fiber.child_lanes = child_lanes;
    fiber.subtree_flags |= subtree_flags;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(changes: &[PropChange]) -> Vec<String> {
        changes
            .iter()
            .map(|change| match change {
                PropChange::Set(key, value) => format!("{key}={value:?}"),
                PropChange::Text(text) => format!("#text={text}"),
            })
            .collect()
    }

    #[test]
    fn identical_props_produce_no_payload() {
        let props = Props::new().with("id", "a").with_children("hi");
        assert!(diff_properties(&props, &props).is_empty());
        let copy = Props::new().with("id", "a").with_children("hi");
        assert!(diff_properties(&props, &copy).is_empty());
    }

    #[test]
    fn payload_lists_removals_then_changes() {
        let previous = Props::new().with("id", "a").with("title", "t").with("n", 1);
        let next = Props::new().with("n", 2).with("id", "a").with("lang", "en");
        assert_eq!(
            kinds(&diff_properties(&previous, &next)),
            ["title=Null", "n=Int(2)", "lang=Str(\"en\")"]
        );
    }

    #[test]
    fn text_children_diff_as_content() {
        let previous = Props::new().with_children("old");
        let next = Props::new().with_children("new");
        assert_eq!(kinds(&diff_properties(&previous, &next)), ["#text=new"]);

        let cleared = Props::new().with_children(crate::element::Node::Empty);
        assert_eq!(kinds(&diff_properties(&next, &cleared)), ["#text="]);
    }
}
