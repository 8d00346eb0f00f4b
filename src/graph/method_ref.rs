use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;
use crate::ir::CallSite;

/// Symbolic method reference: `(owner, name, descriptor)`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn of_site(site: &CallSite) -> Self {
        Self::new(&site.owner, &site.name, &site.descriptor)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.owner, self.name, self.descriptor)
    }
}

/// Parses `owner.name(descriptor)return`, the form used on the command line.
impl FromStr for MethodRef {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || GraphError::InvalidMethodRef(value.to_string());
        let paren = value.find('(').ok_or_else(invalid)?;
        let (qualified, descriptor) = value.split_at(paren);
        let dot = qualified.rfind('.').ok_or_else(invalid)?;
        let (owner, name) = (&qualified[..dot], &qualified[dot + 1..]);
        if owner.is_empty() || name.is_empty() || !descriptor.contains(')') {
            return Err(invalid());
        }
        Ok(Self::new(owner, name, descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_line_form() {
        let reference: MethodRef = "com/example/App.main([Ljava/lang/String;)V"
            .parse()
            .expect("parse method");

        assert_eq!(reference.owner, "com/example/App");
        assert_eq!(reference.name, "main");
        assert_eq!(reference.descriptor, "([Ljava/lang/String;)V");
        assert_eq!(
            reference.to_string(),
            "com/example/App.main ([Ljava/lang/String;)V"
        );
    }

    #[test]
    fn rejects_references_without_descriptor() {
        assert!("com/example/App.main".parse::<MethodRef>().is_err());
        assert!(".main()V".parse::<MethodRef>().is_err());
        assert!("App.()V".parse::<MethodRef>().is_err());
    }
}
