pub mod validate;

pub use validate::{
    parse_port, validate_backup_name, validate_email, validate_hostname, validate_map_token,
    validate_password,
};
