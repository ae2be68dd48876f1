//! Parsing the XML returned by `org.freedesktop.DBus.Introspectable` into
//! interface descriptors.


use std::cell::OnceCell;
use std::error;
use std::fmt;
use std::rc::Rc;

use xmlparser::{ElementEnd, Token, Tokenizer};

use crate::signature::{self, Codec, CodecCache, SignatureError};

/// The root of an introspection document.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// The interfaces the object implements.
    pub interfaces: Vec<Interface>,
    /// Names of child object nodes, when the document lists any.
    pub children: Vec<Box<str>>,
}

impl Node {
    /// Look up an interface by name.
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|interface| &*interface.name == name)
    }
}

/// One interface with its members.
#[derive(Debug, Clone)]
pub struct Interface {
    /// The interface name.
    pub name: Box<str>,
    /// The callable methods.
    pub methods: Vec<Method>,
    /// The signals the interface emits.
    pub signals: Vec<Signal>,
    /// The exposed properties.
    pub properties: Vec<Property>,
}

impl Interface {
    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| &*method.name == name)
    }
}

/// The direction of a method or signal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// An argument the caller supplies.
    In,
    /// An argument the reply carries.
    Out,
}

/// The access mode of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

/// One argument of a method or signal.
#[derive(Debug, Clone)]
pub struct Arg {
    /// The argument name, when the document carries one.
    pub name: Option<Box<str>>,
    /// The argument's D-Bus signature.
    pub signature: Box<str>,
    /// The direction; absent in the document, it defaults to `in` for
    /// methods and `out` for signals.
    pub direction: Direction,
}

/// One callable method.
///
/// The codec lists over the `in` and `out` arguments are compiled on first
/// use and cached.
#[derive(Debug, Clone)]
pub struct Method {
    /// The method name.
    pub name: Box<str>,
    /// The arguments in declaration order, both directions.
    pub args: Vec<Arg>,
    in_codecs: OnceCell<Rc<[Codec]>>,
    out_codecs: OnceCell<Rc<[Codec]>>,
}

impl Method {
    fn new(name: Box<str>, args: Vec<Arg>) -> Self {
        Self {
            name,
            args,
            in_codecs: OnceCell::new(),
            out_codecs: OnceCell::new(),
        }
    }

    fn signature(&self, direction: Direction) -> String {
        self.args
            .iter()
            .filter(|arg| arg.direction == direction)
            .map(|arg| &*arg.signature)
            .collect()
    }

    /// The concatenated signature of the `in` arguments.
    pub fn arg_signature(&self) -> String {
        self.signature(Direction::In)
    }

    /// The concatenated signature of the `out` arguments.
    pub fn reply_signature(&self) -> String {
        self.signature(Direction::Out)
    }

    /// The codecs of the `in` arguments, compiled through `cache` on first
    /// use.
    pub fn arg_codecs(&self, cache: &CodecCache) -> Result<Rc<[Codec]>, SignatureError> {
        if let Some(codecs) = self.in_codecs.get() {
            return Ok(Rc::clone(codecs));
        }

        let codecs = cache.compile(&self.arg_signature())?;
        Ok(Rc::clone(self.in_codecs.get_or_init(|| codecs)))
    }

    /// The codecs of the `out` arguments, compiled through `cache` on first
    /// use.
    pub fn reply_codecs(&self, cache: &CodecCache) -> Result<Rc<[Codec]>, SignatureError> {
        if let Some(codecs) = self.out_codecs.get() {
            return Ok(Rc::clone(codecs));
        }

        let codecs = cache.compile(&self.reply_signature())?;
        Ok(Rc::clone(self.out_codecs.get_or_init(|| codecs)))
    }
}

/// One signal.
#[derive(Debug, Clone)]
pub struct Signal {
    /// The signal name.
    pub name: Box<str>,
    /// The arguments the signal carries.
    pub args: Vec<Arg>,
}

/// One property.
#[derive(Debug, Clone)]
pub struct Property {
    /// The property name.
    pub name: Box<str>,
    /// The property's D-Bus signature.
    pub signature: Box<str>,
    /// The access mode.
    pub access: Access,
}

/// Parse an introspection document.
///
/// Unknown elements and attributes, such as annotations, are skipped;
/// missing argument lists mean zero arguments.
pub fn parse_introspection(xml: &str) -> Result<Node, IntrospectError> {
    let mut stack: Vec<State> = Vec::new();
    let mut root = None;
    let mut skip = 0usize;

    for token in Tokenizer::from(xml) {
        let token = token.map_err(|error| IntrospectError::new(ErrorKind::Xml(error)))?;

        match token {
            Token::ElementStart { local, .. } => {
                if skip > 0 {
                    skip += 1;
                    continue;
                }

                match (stack.last(), local.as_str()) {
                    (None, "node") => stack.push(State::Node(Node::default())),
                    (Some(State::Node(..)), "node") => {
                        stack.push(State::ChildNode { name: None });
                    }
                    (Some(State::Node(..)), "interface") => {
                        stack.push(State::Interface(InterfaceBuilder::default()));
                    }
                    (Some(State::Interface(..)), "method") => {
                        stack.push(State::Member(MemberBuilder::default()));
                    }
                    (Some(State::Interface(..)), "signal") => {
                        stack.push(State::SignalMember(MemberBuilder::default()));
                    }
                    (Some(State::Interface(..)), "property") => {
                        stack.push(State::Property(PropertyBuilder::default()));
                    }
                    (Some(State::Member(..) | State::SignalMember(..)), "arg") => {
                        stack.push(State::Arg(ArgBuilder::default()));
                    }
                    _ => skip = 1,
                }
            }
            Token::ElementEnd {
                end: ElementEnd::Open,
                ..
            } => {}
            Token::ElementEnd { .. } if skip > 0 => skip -= 1,
            Token::ElementEnd { .. } => {
                let Some(top) = stack.pop() else {
                    return Err(IntrospectError::new(ErrorKind::UnexpectedElementEnd));
                };

                match (stack.last_mut(), top) {
                    (None, State::Node(node)) => root = Some(node),
                    (Some(State::Node(node)), State::ChildNode { name }) => {
                        if let Some(name) = name {
                            node.children.push(name);
                        }
                    }
                    (Some(State::Node(node)), State::Interface(builder)) => {
                        node.interfaces.push(builder.build()?);
                    }
                    (Some(State::Interface(interface)), State::Member(builder)) => {
                        interface.methods.push(builder.build_method()?);
                    }
                    (Some(State::Interface(interface)), State::SignalMember(builder)) => {
                        interface.signals.push(builder.build_signal()?);
                    }
                    (Some(State::Interface(interface)), State::Property(builder)) => {
                        interface.properties.push(builder.build()?);
                    }
                    (Some(State::Member(method)), State::Arg(builder)) => {
                        method.args.push(builder.build(Direction::In)?);
                    }
                    (Some(State::SignalMember(signal)), State::Arg(builder)) => {
                        signal.args.push(builder.build(Direction::Out)?);
                    }
                    _ => return Err(IntrospectError::new(ErrorKind::UnexpectedElementEnd)),
                }
            }
            Token::Attribute { local, value, .. } => {
                if skip > 0 {
                    continue;
                }

                match (stack.last_mut(), local.as_str()) {
                    (Some(State::ChildNode { name }), "name") => {
                        *name = Some(value.as_str().into());
                    }
                    (Some(State::Interface(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Member(builder) | State::SignalMember(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Property(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Property(builder)), "type") => {
                        builder.signature = Some(value.as_str().into());
                    }
                    (Some(State::Property(builder)), "access") => {
                        builder.access = Some(match value.as_str() {
                            "read" => Access::Read,
                            "write" => Access::Write,
                            "readwrite" => Access::ReadWrite,
                            other => {
                                return Err(IntrospectError::new(ErrorKind::BadAccess(
                                    other.into(),
                                )));
                            }
                        });
                    }
                    (Some(State::Arg(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Arg(builder)), "type") => {
                        builder.signature = Some(value.as_str().into());
                    }
                    (Some(State::Arg(builder)), "direction") => {
                        builder.direction = Some(match value.as_str() {
                            "in" => Direction::In,
                            "out" => Direction::Out,
                            other => {
                                return Err(IntrospectError::new(ErrorKind::BadDirection(
                                    other.into(),
                                )));
                            }
                        });
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    root.ok_or_else(|| IntrospectError::new(ErrorKind::MissingNode))
}

enum State {
    Node(Node),
    ChildNode { name: Option<Box<str>> },
    Interface(InterfaceBuilder),
    Member(MemberBuilder),
    SignalMember(MemberBuilder),
    Property(PropertyBuilder),
    Arg(ArgBuilder),
}

#[derive(Default)]
struct InterfaceBuilder {
    name: Option<Box<str>>,
    methods: Vec<Method>,
    signals: Vec<Signal>,
    properties: Vec<Property>,
}

impl InterfaceBuilder {
    fn build(self) -> Result<Interface, IntrospectError> {
        let name = self
            .name
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingInterfaceName))?;

        Ok(Interface {
            name,
            methods: self.methods,
            signals: self.signals,
            properties: self.properties,
        })
    }
}

#[derive(Default)]
struct MemberBuilder {
    name: Option<Box<str>>,
    args: Vec<Arg>,
}

impl MemberBuilder {
    fn build_method(self) -> Result<Method, IntrospectError> {
        let name = self
            .name
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingMethodName))?;
        Ok(Method::new(name, self.args))
    }

    fn build_signal(self) -> Result<Signal, IntrospectError> {
        let name = self
            .name
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingSignalName))?;
        Ok(Signal {
            name,
            args: self.args,
        })
    }
}

#[derive(Default)]
struct PropertyBuilder {
    name: Option<Box<str>>,
    signature: Option<Box<str>>,
    access: Option<Access>,
}

impl PropertyBuilder {
    fn build(self) -> Result<Property, IntrospectError> {
        let name = self
            .name
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingPropertyName))?;
        let signature = self
            .signature
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingPropertyType))?;
        let access = self
            .access
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingPropertyAccess))?;

        signature::parse(&signature)?;

        Ok(Property {
            name,
            signature,
            access,
        })
    }
}

#[derive(Default)]
struct ArgBuilder {
    name: Option<Box<str>>,
    signature: Option<Box<str>>,
    direction: Option<Direction>,
}

impl ArgBuilder {
    fn build(self, default_direction: Direction) -> Result<Arg, IntrospectError> {
        let signature = self
            .signature
            .ok_or_else(|| IntrospectError::new(ErrorKind::MissingArgType))?;

        signature::parse(&signature)?;

        Ok(Arg {
            name: self.name,
            signature,
            direction: self.direction.unwrap_or(default_direction),
        })
    }
}

/// An error raised while parsing an introspection document.
#[derive(Debug)]
pub struct IntrospectError {
    kind: ErrorKind,
}

impl IntrospectError {
    fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl fmt::Display for IntrospectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Xml(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::MissingNode => write!(f, "Document has no root <node>"),
            ErrorKind::UnexpectedElementEnd => write!(f, "Unexpected element end"),
            ErrorKind::MissingInterfaceName => write!(f, "<interface> without a name"),
            ErrorKind::MissingMethodName => write!(f, "<method> without a name"),
            ErrorKind::MissingSignalName => write!(f, "<signal> without a name"),
            ErrorKind::MissingPropertyName => write!(f, "<property> without a name"),
            ErrorKind::MissingPropertyType => write!(f, "<property> without a type"),
            ErrorKind::MissingPropertyAccess => write!(f, "<property> without an access mode"),
            ErrorKind::MissingArgType => write!(f, "<arg> without a type"),
            ErrorKind::BadAccess(access) => write!(f, "Unknown access mode `{access}`"),
            ErrorKind::BadDirection(direction) => {
                write!(f, "Unknown arg direction `{direction}`")
            }
        }
    }
}

impl error::Error for IntrospectError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Xml(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            _ => None,
        }
    }
}

impl From<SignatureError> for IntrospectError {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

#[derive(Debug)]
enum ErrorKind {
    Xml(xmlparser::Error),
    Signature(SignatureError),
    MissingNode,
    UnexpectedElementEnd,
    MissingInterfaceName,
    MissingMethodName,
    MissingSignalName,
    MissingPropertyName,
    MissingPropertyType,
    MissingPropertyAccess,
    MissingArgType,
    BadAccess(Box<str>),
    BadDirection(Box<str>),
}
