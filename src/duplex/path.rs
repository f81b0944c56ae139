use std::fmt;

use crate::duplex::error::RpcError;

/// A parsed method identifier: `/{package}.{service}/{method}`.
///
/// The package may itself contain dots (`google.pubsub.v1.Publisher`); the service is the last
/// dot-separated segment before the slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl MethodPath {
    /// Parse a method path, with or without the leading slash.
    ///
    /// # Example
    /// ```ignore
    /// let path = MethodPath::parse("/example.ExampleService/SayHello")?;
    /// assert_eq!(path.service, "ExampleService");
    /// ```
    pub fn parse(path: &str) -> Result<Self, RpcError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);

        let (qualified_service, method) = trimmed
            .split_once('/')
            .ok_or_else(|| RpcError::PathParse(format!("'{path}' is missing a method segment")))?;

        let (package, service) = qualified_service.rsplit_once('.').ok_or_else(|| {
            RpcError::PathParse(format!("'{path}' is missing a package qualifier"))
        })?;

        if package.is_empty() || service.is_empty() || method.is_empty() || method.contains('/')
        {
            return Err(RpcError::PathParse(format!(
                "'{path}' is not of the form /package.Service/Method"
            )));
        }

        Ok(Self {
            package: package.to_string(),
            service: service.to_string(),
            method: method.to_string(),
        })
    }

    /// The fully-qualified service name, e.g. `example.ExampleService`.
    pub fn service_name(&self) -> String {
        format!("{}.{}", self.package, self.service)
    }

    /// The canonical path used as the dispatch key, e.g. `/example.ExampleService/SayHello`.
    pub fn full_path(&self) -> String {
        format!("/{}.{}/{}", self.package, self.service, self.method)
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}.{}/{}", self.package, self.service, self.method)
    }
}
