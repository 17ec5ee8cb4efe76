//! Shared fixtures for unit tests

pub mod rsa {
    use aliri_base64::Base64Url;
    use ring::{rand::SystemRandom, signature::RsaKeyPair};
    use serde_json::Value;

    use crate::{bearer::BearerToken, jwks::KeySet, jwk::SigningKey};

    pub const TEST_KEY_ID: &str = "gatehouse-test-key";

    /// The public half of `PRIVATE_KEY_DER`, alongside an EC key that
    /// should be ignored
    pub const JWKS: &str = include_str!("../data/rsa/jwks.json");

    /// 2048-bit RSA private key, PKCS#8 DER
    pub const PRIVATE_KEY_DER: &[u8] = include_bytes!("../data/rsa/private.pk8");

    pub const DOMAIN: &str = "tenant.example.com";
    pub const ISSUER: &str = "https://tenant.example.com/";
    pub const AUDIENCE: &str = "image";

    /// The RSA entry of `JWKS`, as JSON text
    pub fn jwk_json() -> String {
        let jwks: Value = serde_json::from_str(JWKS).unwrap();
        jwks["keys"][0].to_string()
    }

    pub fn signing_key() -> SigningKey {
        serde_json::from_str::<crate::jwk::JwkDto>(&jwk_json())
            .unwrap()
            .try_into()
            .unwrap()
    }

    pub fn key_set() -> KeySet {
        KeySet::from_json(JWKS.as_bytes()).unwrap()
    }

    /// Encodes and signs a token with RS256 under the test key
    pub fn sign(header: &Value, claims: &Value) -> BearerToken {
        sign_with(&ring::signature::RSA_PKCS1_SHA256, header, claims)
    }

    pub fn sign_with(
        encoding: &'static dyn ring::signature::RsaEncoding,
        header: &Value,
        claims: &Value,
    ) -> BearerToken {
        let header = Base64Url::from_raw(serde_json::to_vec(header).unwrap());
        let claims = Base64Url::from_raw(serde_json::to_vec(claims).unwrap());
        let message = format!("{header}.{claims}");

        let key_pair = RsaKeyPair::from_pkcs8(PRIVATE_KEY_DER).unwrap();
        let mut signature = vec![0; key_pair.public().modulus_len()];
        key_pair
            .sign(encoding, &SystemRandom::new(), message.as_bytes(), &mut signature)
            .unwrap();

        BearerToken::new(format!("{message}.{}", Base64Url::from_raw(signature)))
    }

    /// A standard RS256 header naming the test key
    pub fn header() -> Value {
        serde_json::json!({ "alg": "RS256", "typ": "JWT", "kid": TEST_KEY_ID })
    }

    /// Claims that pass validation at `now`, granting `permissions`
    pub fn claims(now: u64, permissions: &[&str]) -> Value {
        serde_json::json!({
            "sub": "auth0|tester",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 3600,
            "permissions": permissions,
        })
    }
}
