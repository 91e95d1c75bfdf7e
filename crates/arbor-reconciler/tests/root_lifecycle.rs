//! End-to-end behaviour of a [`Root`] rendering into a [`MemoryHost`],
//! driven by a real scheduler and event loop with a frozen clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor_reconciler::{
    ClassComponent, ClassType, Component, Context, Element, HostOp, MemoType, MemoryHost, Node,
    PropValue, Props, ReconcileError, Root, RootConfig, Setter, deps, memo,
};
use arbor_scheduler::{EventLoop, ManualClock, Scheduler, SchedulerConfig};

fn harness() -> (Rc<EventLoop>, Root<MemoryHost>) {
    let event_loop = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let scheduler = Scheduler::new(SchedulerConfig::default(), clock, event_loop.clone());
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let root = Root::new(host, container, scheduler, event_loop.clone(), RootConfig::default());
    (event_loop, root)
}

fn markup(root: &Root<MemoryHost>) -> String {
    let container = root.container();
    root.with_host(|host| host.to_markup(container))
}

fn take_ops(root: &Root<MemoryHost>) -> Vec<HostOp> {
    root.with_host_mut(MemoryHost::take_ops)
}

fn keyed_items(keys: &[&str]) -> Node {
    keys.iter()
        .map(|&key| Node::from(Element::host("li", Props::new().with_children(key)).keyed(key)))
        .collect()
}

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn nothing_renders_until_the_loop_runs() {
    let (event_loop, root) = harness();
    root.render(Element::host("p", Props::new()));
    assert_eq!(markup(&root), "<root></root>");
    assert!(root.has_pending_work());

    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><p></p></root>");
    assert_eq!(root.commit_count(), 1);
    assert!(!root.has_pending_work());
}

#[test]
fn updated_host_element_is_patched_in_place() {
    let (event_loop, root) = harness();
    root.render(Element::host("div", Props::new().with("id", "a").with_children("x")));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), r#"<root><div id="a">x</div></root>"#);
    take_ops(&root);

    root.render(Element::host("div", Props::new().with("id", "b").with_children("y")));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), r#"<root><div id="b">y</div></root>"#);
    let ops = take_ops(&root);
    assert_eq!(ops.len(), 2, "{ops:?}");
    assert!(
        ops.iter()
            .all(|op| !matches!(op, HostOp::CreateElement { .. } | HostOp::CreateText { .. }))
    );
}

#[test]
fn keyed_reorder_moves_without_recreating() {
    let (event_loop, root) = harness();
    root.render(keyed_items(&["a", "b", "c"]));
    event_loop.run_until_idle().unwrap();
    take_ops(&root);

    root.render(keyed_items(&["c", "a", "b"]));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><li>c</li><li>a</li><li>b</li></root>");
    let ops = take_ops(&root);
    assert!(ops.iter().all(HostOp::is_structural), "{ops:?}");
    assert_eq!(ops.len(), 2);
}

#[test]
fn removed_keys_are_detached_and_fibers_freed() {
    let (event_loop, root) = harness();
    root.render(keyed_items(&["a", "b", "c", "d"]));
    event_loop.run_until_idle().unwrap();
    root.render(keyed_items(&["a", "b", "c", "d"]));
    event_loop.run_until_idle().unwrap();
    let steady = root.fiber_count();

    root.render(keyed_items(&["b", "d"]));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><li>b</li><li>d</li></root>");
    assert!(root.fiber_count() < steady);
    let removed = take_ops(&root)
        .into_iter()
        .filter(|op| matches!(op, HostOp::Remove { .. }))
        .count();
    assert_eq!(removed, 2);
}

#[test]
fn fiber_count_is_stable_across_identical_renders() {
    let (event_loop, root) = harness();
    let tree = || {
        Element::host(
            "section",
            Props::new().with_children(vec![keyed_items(&["x", "y"]), Node::text("tail")]),
        )
    };
    root.render(tree());
    event_loop.run_until_idle().unwrap();
    root.render(tree());
    event_loop.run_until_idle().unwrap();
    let count = root.fiber_count();
    for _ in 0..5 {
        root.render(tree());
        event_loop.run_until_idle().unwrap();
    }
    assert_eq!(root.fiber_count(), count);
    assert_eq!(
        markup(&root),
        "<root><section><li>x</li><li>y</li>tail</section></root>"
    );
}

#[test]
fn state_update_rerenders_only_its_owner() {
    let (event_loop, root) = harness();
    let setter: Rc<RefCell<Option<Setter<i32>>>> = Rc::default();
    let counter_renders = Rc::new(Cell::new(0));
    let label_renders = Rc::new(Cell::new(0));

    let counter = {
        let setter = setter.clone();
        let renders = counter_renders.clone();
        Component::new("Counter", move |cx, _props| {
            renders.set(renders.get() + 1);
            let (count, set) = cx.use_state(0);
            *setter.borrow_mut() = Some(set);
            Element::host("b", Props::new().with_children(count.to_string())).into()
        })
    };
    let label = {
        let renders = label_renders.clone();
        Component::new("Label", move |_cx, props| {
            renders.set(renders.get() + 1);
            let text = props.get("text").and_then(PropValue::as_str).unwrap_or_default();
            Element::host("i", Props::new().with_children(text.to_string())).into()
        })
    };

    root.render(Node::list([
        counter.element(Props::new()).into(),
        label.element(Props::new().with("text", "hi")).into(),
    ]));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><b>0</b><i>hi</i></root>");

    let set = setter.borrow().clone().unwrap();
    set.set(5);
    set.update(|n| n + 1);
    event_loop.run_until_idle().unwrap();

    assert_eq!(markup(&root), "<root><b>6</b><i>hi</i></root>");
    assert_eq!(counter_renders.get(), 2);
    assert_eq!(label_renders.get(), 1);
}

#[test]
fn setter_identity_is_stable() {
    let (event_loop, root) = harness();
    let seen: Rc<RefCell<Vec<Setter<u8>>>> = Rc::default();
    let component = {
        let seen = seen.clone();
        Component::new("Stable", move |cx, _| {
            let (value, set) = cx.use_state(0u8);
            seen.borrow_mut().push(set);
            Node::text(value.to_string())
        })
    };
    root.render(component.element(Props::new()));
    event_loop.run_until_idle().unwrap();
    let first = seen.borrow()[0].clone();
    first.set(1);
    event_loop.run_until_idle().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].ptr_eq(&seen[1]));
    assert_eq!(markup(&root), "<root>1</root>");
}

#[test]
fn effects_run_layout_then_passive_and_tear_down_on_change() {
    let (event_loop, root) = harness();
    let events = log();
    let component = {
        let events = events.clone();
        Component::new("Effects", move |cx, props| {
            let id = props.get("id").and_then(PropValue::as_int).unwrap_or_default();
            events.borrow_mut().push(format!("render {id}"));
            let e = events.clone();
            cx.use_layout_effect(
                move || {
                    e.borrow_mut().push(format!("layout {id}"));
                    None
                },
                deps![id],
            );
            let e = events.clone();
            cx.use_effect(
                move || {
                    e.borrow_mut().push(format!("passive {id}"));
                    let e = e.clone();
                    Some(Box::new(move || e.borrow_mut().push(format!("cleanup {id}"))))
                },
                deps![id],
            );
            Node::Empty
        })
    };

    root.render(component.element(Props::new().with("id", 1)));
    event_loop.run_until_idle().unwrap();
    root.render(component.element(Props::new().with("id", 1)));
    event_loop.run_until_idle().unwrap();
    root.render(component.element(Props::new().with("id", 2)));
    event_loop.run_until_idle().unwrap();
    root.unmount();
    event_loop.run_until_idle().unwrap();

    assert_eq!(
        *events.borrow(),
        [
            "render 1",
            "layout 1",
            "passive 1",
            "render 1",
            "render 2",
            "layout 2",
            "cleanup 1",
            "passive 2",
            "cleanup 2",
        ]
    );
}

struct Ticker {
    events: Log,
    renders: u32,
}

impl ClassComponent for Ticker {
    fn render(&mut self, props: &Props) -> Node {
        self.renders += 1;
        let label = props.get("label").and_then(PropValue::as_str).unwrap_or("?");
        Element::host("tick", Props::new().with_children(format!("{label}:{}", self.renders))).into()
    }

    fn will_unmount(&mut self) {
        self.events.borrow_mut().push(format!("unmount after {}", self.renders));
    }
}

#[test]
fn class_instances_persist_and_unmount_once() {
    let (event_loop, root) = harness();
    let events = log();
    let ticker = {
        let events = events.clone();
        ClassType::new("Ticker", move |_props: &Props| -> Box<dyn ClassComponent> {
            Box::new(Ticker {
                events: events.clone(),
                renders: 0,
            })
        })
    };

    root.render(Element::class(&ticker, Props::new().with("label", "a")));
    event_loop.run_until_idle().unwrap();
    root.render(Element::class(&ticker, Props::new().with("label", "b")));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><tick>b:2</tick></root>");

    root.unmount();
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root></root>");
    assert_eq!(*events.borrow(), ["unmount after 2"]);

    root.render(Element::class(&ticker, Props::new()));
    event_loop.run_until_idle().unwrap();
    assert!(root.is_unmounted());
    assert_eq!(markup(&root), "<root></root>");
}

#[test]
fn memo_skips_equal_props_and_honours_custom_compare() {
    let (event_loop, root) = harness();
    let renders = Rc::new(Cell::new(0));
    let item = {
        let renders = renders.clone();
        Component::new("Item", move |_cx, props| {
            renders.set(renders.get() + 1);
            let text = props.get("text").and_then(PropValue::as_str).unwrap_or_default();
            Element::host("em", Props::new().with_children(text.to_string())).into()
        })
    };
    let shallow = memo(&item);
    let by_id = MemoType::new(item.clone()).with_compare(|a, b| match (a.get("id"), b.get("id")) {
        (Some(a), Some(b)) => a.is_same(b),
        _ => false,
    });

    let tree = |text: &str| -> Node {
        Node::list([
            Element::memo(&shallow, Props::new().with("text", text)).into(),
            Element::memo(&by_id, Props::new().with("id", 7).with("text", text)).into(),
        ])
    };

    root.render(tree("one"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(renders.get(), 2);

    root.render(tree("one"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(renders.get(), 2, "equal props bail out");

    root.render(tree("two"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(renders.get(), 3, "custom compare ignores text");
    assert_eq!(markup(&root), "<root><em>two</em><em>one</em></root>");
}

#[test]
fn memo_with_default_props_fills_missing_attributes() {
    let (event_loop, root) = harness();
    let badge = Component::new("Badge", |_cx, props| {
        let tone = props.get("tone").and_then(PropValue::as_str).unwrap_or("none");
        Element::host("span", Props::new().with("tone", tone).with_children("!")).into()
    });
    let wrapped = memo(&badge).with_default_props(Props::new().with("tone", "info"));

    root.render(Node::list([
        Element::memo(&wrapped, Props::new()).into(),
        Element::memo(&wrapped, Props::new().with("tone", "warn")).into(),
    ]));
    event_loop.run_until_idle().unwrap();
    assert_eq!(
        markup(&root),
        r#"<root><span tone="info">!</span><span tone="warn">!</span></root>"#
    );
}

#[test]
fn context_change_reaches_consumer_behind_memo() {
    let (event_loop, root) = harness();
    let theme = Context::new("light".to_string());
    let wrapper_renders = Rc::new(Cell::new(0));

    let consumer = {
        let theme = theme.clone();
        Component::new("Consumer", move |cx, _| {
            let value = cx.use_context(&theme);
            Element::host("span", Props::new().with_children(value)).into()
        })
    };
    let wrapper = {
        let renders = wrapper_renders.clone();
        let consumer = consumer.clone();
        Component::new("Wrapper", move |_cx, _| {
            renders.set(renders.get() + 1);
            consumer.element(Props::new()).into()
        })
    };
    let wrapper = memo(&wrapper);
    let tree = |value: &str| theme.provider(value.to_string(), Element::memo(&wrapper, Props::new()));

    root.render(tree("dark"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><span>dark</span></root>");

    root.render(tree("dim"));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><span>dim</span></root>");
    assert_eq!(wrapper_renders.get(), 1);
    assert_eq!(theme.current(), "light");
}

#[test]
fn nested_providers_shadow_outer_values() {
    let (event_loop, root) = harness();
    let depth = Context::new(0i64);
    let reader = {
        let depth = depth.clone();
        Component::new("Reader", move |cx, _| Node::text(cx.use_context(&depth).to_string()))
    };

    root.render(Node::list([
        reader.element(Props::new()).into(),
        depth
            .provider(
                1,
                Node::list([
                    reader.element(Props::new()).into(),
                    depth.provider(2, reader.element(Props::new())).into(),
                    reader.element(Props::new()).into(),
                ]),
            )
            .into(),
        reader.element(Props::new()).into(),
    ]));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root>01210</root>");
}

#[test]
fn hook_order_change_fails_the_pass_and_keeps_the_tree() {
    let (event_loop, root) = harness();
    let flaky = Component::new("Flaky", |cx, props| {
        let (a, _) = cx.use_state(1);
        if props.get("extra").is_some() {
            cx.use_ref(|| 0u8);
        }
        Node::text(a.to_string())
    });

    root.render(flaky.element(Props::new()));
    event_loop.run_until_idle().unwrap();
    let fibers = root.fiber_count();

    root.render(flaky.element(Props::new().with("extra", true)));
    let err = event_loop.run_until_idle().unwrap_err();
    match err.downcast_ref::<ReconcileError>() {
        Some(ReconcileError::HookOrderMismatch { component, index, .. }) => {
            assert_eq!(component, "Flaky");
            assert_eq!(*index, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(markup(&root), "<root>1</root>");
    assert_eq!(root.fiber_count(), fibers);

    root.render(flaky.element(Props::new()));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root>1</root>");
}

#[test]
fn host_failure_during_commit_keeps_previous_tree() {
    let (event_loop, root) = harness();
    root.render(Element::host("ul", Props::new().with_children(keyed_items(&["a"]))));
    event_loop.run_until_idle().unwrap();
    let commits = root.commit_count();

    root.with_host_mut(|host| host.fail_next("append_child"));
    root.render(Element::host("ul", Props::new().with_children(keyed_items(&["a", "b"]))));
    let err = event_loop.run_until_idle().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReconcileError>(),
        Some(ReconcileError::Host(host)) if host.op() == "append_child"
    ));
    assert_eq!(root.commit_count(), commits);
    assert_eq!(markup(&root), "<root><ul><li>a</li></ul></root>");

    root.render(Element::host("ul", Props::new().with_children(keyed_items(&["a", "b"]))));
    event_loop.run_until_idle().unwrap();
    assert_eq!(markup(&root), "<root><ul><li>a</li><li>b</li></ul></root>");
}

#[test]
fn flush_sync_bypasses_the_loop() {
    let (_event_loop, root) = harness();
    let events = log();
    let component = {
        let events = events.clone();
        Component::new("Sync", move |cx, _| {
            let e = events.clone();
            cx.use_effect(
                move || {
                    e.borrow_mut().push("passive".to_string());
                    None
                },
                deps![],
            );
            Node::text("now")
        })
    };
    root.render(component.element(Props::new()));
    root.flush_sync().unwrap();
    assert_eq!(markup(&root), "<root>now</root>");
    assert_eq!(*events.borrow(), ["passive"]);
}
