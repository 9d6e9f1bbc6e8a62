//! Pre- and post-administration duties.
//!
//! Duties wrap a function body with cross-cutting work (begin/commit a
//! transaction, bind a request scope) over a declared subset of the
//! function's objects. A failing duty is an escalation at the same point in
//! the chain as a failing body.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::Escalation;
use crate::core::object::ManagedObject;

/// A cross-cutting step run immediately before or after a function body.
pub trait Administration: Send + Sync {
    /// Perform the duty.
    ///
    /// # Errors
    ///
    /// Returns the escalation raised by the duty.
    fn administer(&self, context: &mut AdministrationContext) -> Result<(), Escalation>;
}

struct FnAdministration<F>(F);

impl<F> Administration for FnAdministration<F>
where
    F: Fn(&mut AdministrationContext) -> Result<(), Escalation> + Send + Sync,
{
    fn administer(&self, context: &mut AdministrationContext) -> Result<(), Escalation> {
        (self.0)(context)
    }
}

/// Objects visible to one administration duty.
pub struct AdministrationContext {
    function: Arc<str>,
    objects: Vec<ManagedObject>,
}

impl AdministrationContext {
    pub(crate) const fn new(function: Arc<str>, objects: Vec<ManagedObject>) -> Self {
        Self { function, objects }
    }

    /// Name of the administered function.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Number of objects the duty declared.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Typed access to the duty's `index`-th object.
    #[must_use]
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Option<&T> {
        self.objects.get(index)?.downcast_ref::<T>()
    }
}

/// Declaration of an administration duty over named objects.
#[derive(Clone)]
pub struct AdministrationDeclaration {
    pub(crate) name: String,
    pub(crate) duty: Arc<dyn Administration>,
    pub(crate) objects: Vec<String>,
}

impl AdministrationDeclaration {
    /// Declare `duty` over `objects` (names of object bindings).
    pub fn new<I, S>(name: impl Into<String>, duty: Arc<dyn Administration>, objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            duty,
            objects: objects.into_iter().map(Into::into).collect(),
        }
    }

    /// Declare a closure duty over `objects`.
    pub fn from_fn<F, I, S>(name: impl Into<String>, f: F, objects: I) -> Self
    where
        F: Fn(&mut AdministrationContext) -> Result<(), Escalation> + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, Arc::new(FnAdministration(f)), objects)
    }

    /// Duty name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for AdministrationDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdministrationDeclaration")
            .field("name", &self.name)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}
