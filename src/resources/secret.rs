use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use rand::Rng;

use crate::crd::MySQL;
use crate::resources::common::standard_labels;

/// Administrative user written into the auth secret
pub const MYSQL_ROOT_USER: &str = "root";

/// Key holding the user name
pub const KEY_MYSQL_USER: &str = "user";

/// Key holding the password
pub const KEY_MYSQL_PASSWORD: &str = "password";

/// Generate a random password
fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .filter_map(|_| CHARSET.get(rng.random_range(0..CHARSET.len())).map(|&b| b as char))
        .collect()
}

/// Generate the auth Secret holding the root credentials
///
/// The Secret carries no owner reference: it must survive a halted database
/// so a resumed database can reuse the same credentials. It is only ever
/// created, never regenerated.
pub fn generate_auth_secret(db: &MySQL) -> Secret {
    let db_name = db.name_any();

    let string_data = BTreeMap::from([
        (KEY_MYSQL_USER.to_string(), MYSQL_ROOT_USER.to_string()),
        (KEY_MYSQL_PASSWORD.to_string(), generate_password(16)),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(db.auth_secret_name()),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db_name)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}
