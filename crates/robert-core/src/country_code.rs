//! Country code encryption.
//!
//! `ecc = MSB(AES(federation_key, ebid ‖ 0^64)) XOR country_code`
//!
//! Only the federation key and the EBID bytes are involved, so any server of
//! the federation can read the country code before knowing which day key
//! produced the EBID.

use robert_crypto::AesBlockCipher;

use crate::error::RobertError;
use crate::keys::FederationKey;
use crate::model::{CountryCode, Ebid, Ecc};

/// Federation key bound to an AES block cipher.
pub struct CountryCodeCipher {
    cipher: AesBlockCipher,
}

impl CountryCodeCipher {
    pub fn new(federation_key: &FederationKey) -> Result<Self, RobertError> {
        Ok(Self {
            cipher: federation_key.cipher()?,
        })
    }

    fn mask(&self, ebid: &Ebid) -> Result<u8, RobertError> {
        Ok(self.cipher.encrypt_padded(ebid.as_bytes())?[0])
    }

    pub fn encrypt(&self, ebid: &Ebid, country_code: CountryCode) -> Result<Ecc, RobertError> {
        Ok(Ecc(self.mask(ebid)? ^ country_code.0))
    }

    pub fn decrypt(&self, ebid: &Ebid, ecc: Ecc) -> Result<CountryCode, RobertError> {
        Ok(CountryCode(self.mask(ebid)? ^ ecc.0))
    }
}

pub fn encrypt_country_code(
    federation_key: &FederationKey,
    ebid: &Ebid,
    country_code: CountryCode,
) -> Result<Ecc, RobertError> {
    CountryCodeCipher::new(federation_key)?.encrypt(ebid, country_code)
}

pub fn decrypt_country_code(
    federation_key: &FederationKey,
    ebid: &Ebid,
    ecc: Ecc,
) -> Result<CountryCode, RobertError> {
    CountryCodeCipher::new(federation_key)?.decrypt(ebid, ecc)
}
