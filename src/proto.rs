//! Wire messages of `person.PersonService`, mirroring `proto/person.proto`.
//!
//! The messages are derived by hand rather than generated, so field tags and
//! method paths must be kept in step with the schema file.

use std::fmt;

pub const GET_PERSON_INFORMATION: &str = "/person.PersonService/GetPersonInformation";
pub const LIST_PERSONS: &str = "/person.PersonService/ListPersons";
pub const SAVE_PERSONS: &str = "/person.PersonService/SavePersons";
pub const EXCHANGE_PERSONS: &str = "/person.PersonService/ExchangePersons";

#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
#[prost(skip_debug)]
pub struct PersonRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub age: i32,
    #[prost(string, tag = "3")]
    pub email: String,
    #[prost(string, tag = "4")]
    pub password: String,
}

impl fmt::Debug for PersonRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonRequest")
            .field("name", &self.name)
            .field("age", &self.age)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Filter for `ListPersons`.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct ListPersonRequest {
    #[prost(string, tag = "1")]
    pub email: String,
}

/// Unary replies fill `message`; streamed replies fill `age`.
#[derive(Clone, PartialEq, Eq, Hash, prost::Message)]
pub struct PersonResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub age: i32,
    #[prost(string, tag = "3")]
    pub email: String,
    #[prost(string, tag = "4")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    const SCHEMA: &str = include_str!("../proto/person.proto");

    #[test]
    fn test_person_request_field_tags() {
        let request = PersonRequest {
            email: "a@b".to_string(),
            ..Default::default()
        };
        // Field 3, length-delimited.
        assert_eq!(request.encode_to_vec(), vec![0x1a, 3, b'a', b'@', b'b']);
    }

    #[test]
    fn test_response_decodes_streamed_age() {
        // Field 1 "kim", field 2 varint 42.
        let bytes = [0x0a, 3, b'k', b'i', b'm', 0x10, 42];
        let response = PersonResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(response.name, "kim");
        assert_eq!(response.age, 42);
        assert!(response.message.is_empty());
    }

    #[test]
    fn test_debug_redacts_password() {
        let request = PersonRequest {
            name: "Sangwoo".to_string(),
            age: 25,
            email: "robbyra@gmail.com".to_string(),
            password: "sangwooPassword".to_string(),
        };
        let debug = format!("{request:?}");
        assert!(debug.contains("Sangwoo"));
        assert!(!debug.contains("sangwooPassword"));
    }

    #[test]
    fn test_method_paths_match_schema() {
        assert!(SCHEMA.contains("package person;"));
        assert!(SCHEMA.contains("service PersonService"));

        for (path, rpc) in [
            (
                GET_PERSON_INFORMATION,
                "rpc GetPersonInformation (PersonRequest) returns (PersonResponse);",
            ),
            (
                LIST_PERSONS,
                "rpc ListPersons (ListPersonRequest) returns (stream PersonResponse);",
            ),
            (
                SAVE_PERSONS,
                "rpc SavePersons (stream PersonRequest) returns (PersonResponse);",
            ),
            (
                EXCHANGE_PERSONS,
                "rpc ExchangePersons (stream PersonRequest) returns (stream PersonResponse);",
            ),
        ] {
            let method = path.rsplit('/').next().unwrap();
            assert_eq!(path, format!("/person.PersonService/{method}"));
            assert!(SCHEMA.contains(rpc), "missing in schema: {rpc}");
            assert!(rpc.starts_with(&format!("rpc {method} ")));
        }
    }

    #[test]
    fn test_field_tags_match_schema() {
        for field in [
            "string name = 1;",
            "int32 age = 2;",
            "string email = 3;",
            "string password = 4;",
            "string message = 4;",
        ] {
            assert!(SCHEMA.contains(field), "missing in schema: {field}");
        }

        let request = PersonRequest {
            name: "n".to_string(),
            age: 1,
            email: "e".to_string(),
            password: "p".to_string(),
        };
        // Tags 1..=4 in order: string, varint, string, string.
        assert_eq!(
            request.encode_to_vec(),
            vec![0x0a, 1, b'n', 0x10, 1, 0x1a, 1, b'e', 0x22, 1, b'p']
        );
    }
}
