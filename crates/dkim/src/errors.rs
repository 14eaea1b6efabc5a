/// DKIM error status
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    /// Syntactically or semantically broken input: malformed signature,
    /// unusable key, expired signature, and the like.
    Permfail,
    Tempfail,
    /// The signature or key was well-formed but the cryptographic check
    /// itself did not verify.
    Fail,
}

quick_error! {
    #[derive(Debug, PartialEq, Clone)]
    /// DKIM errors
    pub enum DKIMError {
        UnsupportedHashAlgorithm(value: String) {
            display("unsupported hash algorithm: {}", value)
        }
        UnsupportedCanonicalizationType(value: String) {
            display("unsupported canonicalization: {}", value)
        }
        SignatureSyntaxError(err: String) {
            display("signature syntax error: {}", err)
        }
        SignatureMissingRequiredTag(name: &'static str) {
            display("signature missing required tag ({})", name)
        }
        IncompatibleVersion {
            display("incompatible version")
        }
        DomainMismatch {
            display("domain mismatch")
        }
        FromFieldNotSigned {
            display("From field not signed")
        }
        SignatureExpired {
            display("signature expired")
        }
        UnacceptableSignatureHeader {
            display("unacceptable signature header")
        }
        UnsupportedQueryMethod {
            display("unsupported query method")
        }
        KeyUnavailable(err: String) {
            display("key unavailable: {}", err)
        }
        UnknownInternalError(err: String) {
            display("internal error: {}", err)
        }
        NoKeyForSignature {
            display("no key for signature")
        }
        KeySyntaxError {
            display("key syntax error")
        }
        KeyIncompatibleVersion {
            display("key incompatible version")
        }
        KeyRevoked {
            display("key revoked (empty p= tag)")
        }
        InappropriateKeyAlgorithm {
            display("inappropriate key algorithm")
        }
        SignatureDidNotVerify {
            display("signature did not verify")
        }
        BodyHashDidNotVerify {
            display("body hash did not verify")
        }
        MalformedBody {
            display("malformed email body")
        }
        FailedToSign(err: String) {
            display("failed sign: {}", err)
        }
        BuilderError(err: &'static str) {
            display("failed to build object: {}", err)
        }
        HeaderSerializeError(err: String) {
            display("failed to serialize DKIM header: {err}")
        }
        PrivateKeyLoadError(err: String) {
            display("failed to load private key: {}", err)
        }
        BodyLengthMismatch {
            display("body-length tag l= exceeds the canonicalized body length")
        }
        InvalidARCInstance {
            display("ARC instance (i=) out of range")
        }
        MissingARCInstance(instance: u8) {
            display("ARC chain is missing instance {}", instance)
        }
        DuplicateARCInstance(instance: u8) {
            display("ARC chain has duplicate headers for instance {}", instance)
        }
        ArcChainBroken(reason: String) {
            display("ARC chain validation failed: {}", reason)
        }
        CanonicalLineEndingsRequired {
            display("message must use canonical CRLF line endings")
        }
        MessageParseError(err: String) {
            display("failed to parse message: {}", err)
        }
    }
}

impl From<mailauth_message::MailParsingError> for DKIMError {
    fn from(err: mailauth_message::MailParsingError) -> Self {
        DKIMError::MessageParseError(err.to_string())
    }
}

impl From<mailauth_dns::DnsError> for DKIMError {
    fn from(err: mailauth_dns::DnsError) -> Self {
        match err {
            mailauth_dns::DnsError::Temporary(name, reason) => {
                DKIMError::KeyUnavailable(format!("DNS lookup for {name:?} failed: {reason}"))
            }
            mailauth_dns::DnsError::Permanent(..) => DKIMError::NoKeyForSignature,
            mailauth_dns::DnsError::LookupLimitExceeded => {
                DKIMError::KeyUnavailable("too many DNS lookups".to_string())
            }
        }
    }
}

impl DKIMError {
    pub fn status(self) -> Status {
        use DKIMError::*;
        match self {
            SignatureSyntaxError(_)
            | SignatureMissingRequiredTag(_)
            | IncompatibleVersion
            | DomainMismatch
            | FromFieldNotSigned
            | SignatureExpired
            | UnacceptableSignatureHeader
            | UnsupportedQueryMethod
            | NoKeyForSignature
            | KeySyntaxError
            | KeyIncompatibleVersion
            | KeyRevoked
            | InappropriateKeyAlgorithm
            | MalformedBody
            | UnsupportedCanonicalizationType(_)
            | UnsupportedHashAlgorithm(_) => Status::Permfail,
            BodyLengthMismatch
            | InvalidARCInstance
            | MissingARCInstance(_)
            | DuplicateARCInstance(_)
            | ArcChainBroken(_)
            | CanonicalLineEndingsRequired
            | MessageParseError(_) => Status::Permfail,
            SignatureDidNotVerify | BodyHashDidNotVerify => Status::Fail,
            KeyUnavailable(_)
            | UnknownInternalError(_)
            | BuilderError(_)
            | FailedToSign(_)
            | HeaderSerializeError(_)
            | PrivateKeyLoadError(_) => Status::Tempfail,
        }
    }
}
