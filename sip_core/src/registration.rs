use crate::{
    message::{header_values, split_header_list},
    Method, Request, RequestBuilder, Response,
};

/// Which REGISTER to send. Exactly one applies per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    Register,
    /// No Contact header: the registrar answers with the current bindings.
    ListContacts,
    /// Remove our own binding (`expires=0`).
    Unregister,
    /// `Contact: *` with `Expires: 0`.
    UnregisterAll,
}

impl RegistrationKind {
    /// Flag precedence: cancel-all, then cancel, then contact listing.
    pub fn from_flags(cancel_all: bool, cancel: bool, list_contacts: bool) -> Self {
        if cancel_all {
            RegistrationKind::UnregisterAll
        } else if cancel {
            RegistrationKind::Unregister
        } else if list_contacts {
            RegistrationKind::ListContacts
        } else {
            RegistrationKind::Register
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            RegistrationKind::Register => "Successfully registered",
            RegistrationKind::ListContacts => "Request for current contacts",
            RegistrationKind::Unregister => "Unregister contact",
            RegistrationKind::UnregisterAll => "Cancel all registrations",
        }
    }

    /// Build the REGISTER for this kind. `registrar_uri` is the request
    /// URI, `aor` goes into From and To.
    pub fn build_request(
        &self,
        registrar_uri: &str,
        aor: &str,
        to: &str,
        contact: &str,
        expires: u32,
    ) -> Request {
        let builder = RequestBuilder::new(Method::Register, registrar_uri, aor, to);
        let builder = match self {
            RegistrationKind::Register => builder
                .contact(contact)
                .header("Expires", &expires.to_string()),
            RegistrationKind::ListContacts => builder,
            RegistrationKind::Unregister => builder
                .contact(&format!("{};expires=0", contact))
                .header("Expires", "0"),
            RegistrationKind::UnregisterAll => builder.contact("*").header("Expires", "0"),
        };
        builder.build()
    }
}

/// All bindings returned in a REGISTER response, one entry per contact.
pub fn contacts_from_response(resp: &Response) -> Vec<String> {
    header_values(&resp.headers, "Contact")
        .flat_map(split_header_list)
        .map(str::to_string)
        .collect()
}
