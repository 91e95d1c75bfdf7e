#![forbid(unsafe_code)]

//! Described trees: the immutable input the reconciler diffs against.
//!
//! A [`Node`] is what a component returns: nothing, text, one [`Element`], or
//! a list of nodes. Elements carry a [`ElementType`] (host tag, component,
//! fragment, memo wrapper or context provider), an optional [`Key`] and
//! reference-counted [`Props`].
//!
//! Props compare two ways: [`Props::ptr_eq`] (the same props object, the
//! bailout test) and [`Props::shallow_eq`] (key-by-key identity, the default
//! memo comparator). Values compare by identity ([`PropValue::is_same`]):
//! scalars by value, callbacks and opaque values by pointer.

use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::context::AnyContext;
use crate::hooks::RenderCx;

/// Author-supplied identity among siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

macro_rules! key_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(value: $ty) -> Self {
                Self(value.to_string().into())
            }
        })*
    };
}

key_from_int!(i32, i64, u32, u64, usize);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared event-handler style callback.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&PropValue)>);

impl Callback {
    pub fn new(f: impl Fn(&PropValue) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, arg: &PropValue) {
        (self.0)(arg)
    }

    /// Same closure allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A property value.
#[derive(Clone, Default)]
pub enum PropValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Callback(Callback),
    /// Opaque value compared by pointer.
    Any(Rc<dyn Any>),
}

impl PropValue {
    /// Identity comparison.
    ///
    /// Floats compare bitwise, so `NaN` equals itself and `0.0` differs from
    /// `-0.0`. Callbacks and opaque values compare by allocation.
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => a.ptr_eq(b),
            (Self::Any(a), Self::Any(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Self::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    /// Downcast an opaque value.
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            Self::Any(value) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Wrap an arbitrary value; it will compare by allocation.
    pub fn opaque<T: 'static>(value: T) -> Self {
        Self::Any(Rc::new(value))
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Any(_) => f.write_str("Any(..)"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Callback(_) => f.write_str("[callback]"),
            Self::Any(_) => f.write_str("[object]"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<usize> for PropValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<Rc<str>> for PropValue {
    fn from(value: Rc<str>) -> Self {
        Self::Str(value)
    }
}

impl From<Callback> for PropValue {
    fn from(value: Callback) -> Self {
        Self::Callback(value)
    }
}

impl<T: Into<PropValue>> From<Option<T>> for PropValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Clone, Default)]
struct PropsInner {
    attrs: Vec<(Rc<str>, PropValue)>,
    children: Node,
}

/// Immutable, reference-counted element props.
///
/// Attributes keep insertion order; `children` is held apart from them.
#[derive(Clone, Default)]
pub struct Props {
    inner: Rc<PropsInner>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set attribute `key`, replacing an existing value.
    pub fn with(mut self, key: impl Into<Rc<str>>, value: impl Into<PropValue>) -> Self {
        let key = key.into();
        let value = value.into();
        let inner = Rc::make_mut(&mut self.inner);
        match inner.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => inner.attrs.push((key, value)),
        }
        self
    }

    pub fn with_children(mut self, children: impl Into<Node>) -> Self {
        Rc::make_mut(&mut self.inner).children = children.into();
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.inner
            .attrs
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    /// Attributes in insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.inner.attrs.iter().map(|(k, v)| (&**k, v))
    }

    pub fn children(&self) -> &Node {
        &self.inner.children
    }

    /// Same props object.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Same attribute set with identical values and identical children.
    pub fn shallow_eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.inner.attrs.len() != other.inner.attrs.len() {
            return false;
        }
        let attrs_match = self.attrs().all(|(key, value)| {
            other
                .get(key)
                .is_some_and(|other_value| value.is_same(other_value))
        });
        attrs_match && self.children().is_same(other.children())
    }

    /// Fill attributes missing from `self` with `defaults`.
    pub fn merged_with_defaults(&self, defaults: &Props) -> Props {
        let mut merged = self.clone();
        for (key, value) in defaults.attrs() {
            if merged.get(key).is_none() {
                merged = merged.with(key, value.clone());
            }
        }
        merged
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.attrs() {
            map.entry(&key, value);
        }
        if !self.children().is_empty() {
            map.entry(&"children", self.children());
        }
        map.finish()
    }
}

/// A described tree.
#[derive(Clone, Default)]
pub enum Node {
    /// Renders nothing (`null`, `undefined`, booleans).
    #[default]
    Empty,
    /// Text content. Empty text renders nothing.
    Text(Rc<str>),
    Element(Rc<Element>),
    List(Rc<[Node]>),
}

impl Node {
    pub fn text(content: impl Into<Rc<str>>) -> Self {
        Self::Text(content.into())
    }

    pub fn list(children: impl IntoIterator<Item = Node>) -> Self {
        Self::List(children.into_iter().collect())
    }

    /// Produces no fiber.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::Element(_) => false,
            Self::List(items) => items.is_empty(),
        }
    }

    /// Identity comparison: same element allocation, equal text, same list.
    pub fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Text when the node is a single non-empty text value.
    pub fn as_text(&self) -> Option<&Rc<str>> {
        match self {
            Self::Text(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Element(element) => fmt::Debug::fmt(&**element, f),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl From<Element> for Node {
    fn from(value: Element) -> Self {
        Self::Element(Rc::new(value))
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::Text(value.into())
    }
}

impl From<Rc<str>> for Node {
    fn from(value: Rc<str>) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Self::Text(value.to_string().into())
    }
}

impl From<i32> for Node {
    fn from(value: i32) -> Self {
        Self::Text(value.to_string().into())
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Self::Text(value.to_string().into())
    }
}

impl From<bool> for Node {
    fn from(_: bool) -> Self {
        Self::Empty
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Self::List(value.into())
    }
}

impl FromIterator<Node> for Node {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self::list(iter)
    }
}

/// One described element.
#[derive(Clone)]
pub struct Element {
    pub key: Option<Key>,
    pub ty: ElementType,
    pub props: Props,
}

impl Element {
    pub fn new(ty: ElementType, props: Props) -> Self {
        Self {
            key: None,
            ty,
            props,
        }
    }

    /// Host element with `tag`.
    pub fn host(tag: &str, props: Props) -> Self {
        Self::new(ElementType::Host(tag.into()), props)
    }

    /// Function component element.
    pub fn component(component: &Component, props: Props) -> Self {
        Self::new(ElementType::Function(component.clone()), props)
    }

    /// Class component element.
    pub fn class(class: &ClassType, props: Props) -> Self {
        Self::new(ElementType::Class(class.clone()), props)
    }

    /// Memo-wrapped element.
    pub fn memo(memo: &MemoType, props: Props) -> Self {
        Self::new(ElementType::Memo(memo.clone()), props)
    }

    /// Fragment grouping `children` without a host object.
    pub fn fragment(children: impl Into<Node>) -> Self {
        Self::new(
            ElementType::Fragment,
            Props::new().with_children(children),
        )
    }

    pub fn keyed(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Element");
        s.field("type", &self.ty);
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("props", &self.props).finish()
    }
}

/// What an element renders as.
#[derive(Clone)]
pub enum ElementType {
    Host(Rc<str>),
    Function(Component),
    Class(ClassType),
    Fragment,
    Memo(MemoType),
    Provider(ProviderType),
}

impl ElementType {
    /// Whether a fiber of type `self` can be reused for `other`.
    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Class(a), Self::Class(b)) => a.ptr_eq(b),
            (Self::Fragment, Self::Fragment) => true,
            (Self::Memo(a), Self::Memo(b)) => a.ptr_eq(b),
            (Self::Provider(a), Self::Provider(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Display name used in logs and errors.
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Host(tag) => Cow::Borrowed(&**tag),
            Self::Function(component) => Cow::Borrowed(component.name()),
            Self::Class(class) => Cow::Borrowed(class.name()),
            Self::Fragment => Cow::Borrowed("Fragment"),
            Self::Memo(memo) => Cow::Owned(format!("Memo({})", memo.wrapped().name())),
            Self::Provider(_) => Cow::Borrowed("Provider"),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<Component> for ElementType {
    fn from(value: Component) -> Self {
        Self::Function(value)
    }
}

impl From<ClassType> for ElementType {
    fn from(value: ClassType) -> Self {
        Self::Class(value)
    }
}

type RenderFn = dyn Fn(&mut RenderCx, &Props) -> Node;

struct ComponentInner {
    name: Cow<'static, str>,
    render: Box<RenderFn>,
}

/// A function component. Identity is the allocation: clones are the same
/// component, two `Component::new` calls are different components.
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

impl Component {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        render: impl Fn(&mut RenderCx, &Props) -> Node + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ComponentInner {
                name: name.into(),
                render: Box::new(render),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn render(&self, cx: &mut RenderCx, props: &Props) -> Node {
        (self.inner.render)(cx, props)
    }

    /// Element rendering this component with `props`.
    pub fn element(&self, props: Props) -> Element {
        Element::component(self, props)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name())
    }
}

/// Instance behaviour of a class component.
pub trait ClassComponent {
    fn render(&mut self, props: &Props) -> Node;

    /// Called once when the instance's fiber is deleted.
    fn will_unmount(&mut self) {}
}

/// Live class instance, shared between a fiber and its alternate.
pub(crate) type ClassInstance = Rc<RefCell<Box<dyn ClassComponent>>>;

type ConstructFn = dyn Fn(&Props) -> Box<dyn ClassComponent>;

struct ClassTypeInner {
    name: Cow<'static, str>,
    construct: Box<ConstructFn>,
}

/// A class component type: a constructor producing instances.
#[derive(Clone)]
pub struct ClassType {
    inner: Rc<ClassTypeInner>,
}

impl ClassType {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        construct: impl Fn(&Props) -> Box<dyn ClassComponent> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(ClassTypeInner {
                name: name.into(),
                construct: Box::new(construct),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn construct(&self, props: &Props) -> ClassInstance {
        Rc::new(RefCell::new((self.inner.construct)(props)))
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassType({})", self.name())
    }
}

type CompareFn = dyn Fn(&Props, &Props) -> bool;

struct MemoInner {
    wrapped: ElementType,
    compare: Option<Rc<CompareFn>>,
    default_props: Option<Props>,
}

/// Memo wrapper: skips re-rendering `wrapped` while props compare equal.
#[derive(Clone)]
pub struct MemoType {
    inner: Rc<MemoInner>,
}

impl MemoType {
    /// Wrap a component with the default shallow comparison.
    pub fn new(wrapped: impl Into<ElementType>) -> Self {
        Self {
            inner: Rc::new(MemoInner {
                wrapped: wrapped.into(),
                compare: None,
                default_props: None,
            }),
        }
    }

    /// Replace the comparator. It returns `true` when props are equal.
    pub fn with_compare(self, compare: impl Fn(&Props, &Props) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(MemoInner {
                wrapped: self.inner.wrapped.clone(),
                compare: Some(Rc::new(compare)),
                default_props: self.inner.default_props.clone(),
            }),
        }
    }

    /// Attributes merged into props that lack them.
    pub fn with_default_props(self, defaults: Props) -> Self {
        Self {
            inner: Rc::new(MemoInner {
                wrapped: self.inner.wrapped.clone(),
                compare: self.inner.compare.clone(),
                default_props: Some(defaults),
            }),
        }
    }

    pub fn wrapped(&self) -> &ElementType {
        &self.inner.wrapped
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The wrapped function component, when the wrapper adds nothing but the
    /// default comparison.
    pub(crate) fn simple_component(&self) -> Option<&Component> {
        match &self.inner.wrapped {
            ElementType::Function(component)
                if self.inner.compare.is_none() && self.inner.default_props.is_none() =>
            {
                Some(component)
            }
            _ => None,
        }
    }

    pub(crate) fn props_equal(&self, previous: &Props, next: &Props) -> bool {
        match &self.inner.compare {
            Some(compare) => compare(previous, next),
            None => previous.shallow_eq(next),
        }
    }

    pub(crate) fn resolve_props(&self, props: &Props) -> Props {
        match &self.inner.default_props {
            Some(defaults) => props.merged_with_defaults(defaults),
            None => props.clone(),
        }
    }
}

/// Memo wrapper around `component` with shallow prop comparison.
pub fn memo(component: &Component) -> MemoType {
    MemoType::new(component.clone())
}

/// Provider element type for one context.
#[derive(Clone)]
pub struct ProviderType {
    pub(crate) context: Rc<dyn AnyContext>,
}

impl ProviderType {
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.context.context_id() == other.context.context_id()
    }
}
