//! Resource: attributes identifying the entity producing spans.

use crate::common::{KeyValue, Value};
use crate::span::upsert_attribute;

/// The attribute key under which the service name is recorded.
pub const SERVICE_NAME: &str = "service.name";

/// An immutable set of attributes describing the entity that produced a
/// batch of spans, such as the service name and deployment environment.
///
/// A `Resource` belongs to a [`TracerProvider`] and is installed into the
/// processor/exporter pipeline at construction time rather than copied onto
/// every span.
///
/// [`TracerProvider`]: crate::provider::TracerProvider
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    attributes: Vec<KeyValue>,
}

impl Resource {
    /// Creates an empty resource.
    pub fn empty() -> Self {
        Resource::default()
    }

    /// Creates a builder for a new resource.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::default()
    }

    /// Returns the value for the given attribute key, if set.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find_map(|kv| (kv.key.as_str() == key).then_some(&kv.value))
    }

    /// Iterates over all attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }

    /// Returns `true` if no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub(crate) fn insert(&mut self, attribute: KeyValue) {
        upsert_attribute(&mut self.attributes, attribute);
    }
}

/// Builder for [`Resource`].
#[derive(Debug, Default)]
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    /// Records the service name under the `service.name` key.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.resource.insert(KeyValue::new(SERVICE_NAME, name.into()));
        self
    }

    /// Adds a single attribute, overwriting any previous value for its key.
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.resource.insert(attribute);
        self
    }

    /// Adds multiple attributes.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        for attribute in attributes {
            self.resource.insert(attribute);
        }
        self
    }

    /// Builds the resource.
    pub fn build(self) -> Resource {
        self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_service_name() {
        let resource = Resource::builder()
            .with_service_name("checkout")
            .with_attribute(KeyValue::new("deployment.environment", "staging"))
            .build();

        assert_eq!(
            resource.get(SERVICE_NAME),
            Some(&Value::String("checkout".to_string().into()))
        );
        assert_eq!(resource.iter().count(), 2);
    }

    #[test]
    fn later_attributes_overwrite_earlier() {
        let resource = Resource::builder()
            .with_service_name("first")
            .with_service_name("second")
            .build();

        assert_eq!(resource.iter().count(), 1);
        assert_eq!(resource.get(SERVICE_NAME).map(|v| v.to_string()), Some("second".into()));
    }
}
