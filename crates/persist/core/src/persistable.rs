use persist_types::PropertySet;
use std::any::Any;
use std::fmt;

/// An application value the framework can persist.
///
/// The framework only touches it through its type identity and the
/// [`Formatter`](crate::Formatter) registered for that type.
pub trait Persistable: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn Persistable {
    pub fn is<T: Persistable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Persistable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Persistable>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Concrete type of the boxed value, not of the box.
    pub fn concrete_type_id(&self) -> std::any::TypeId {
        Any::type_id(self.as_any())
    }
}

impl Persistable for PropertySet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
