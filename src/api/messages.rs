//! Customer-facing error messages in French and English.

use crate::domain::promo::PromoError;
use crate::domain::value_objects::Locale;
use crate::CheckoutError;

pub fn localized(error: &CheckoutError, locale: Locale) -> String {
    match locale {
        Locale::Fr => french(error),
        Locale::En => english(error),
    }
}

fn french(error: &CheckoutError) -> String {
    match error {
        CheckoutError::Validation(detail) => format!("Les informations fournies sont invalides : {detail}"),
        CheckoutError::EmptyCart => "Votre panier est vide.".into(),
        CheckoutError::InvalidQuantity(_) => "La quantité demandée est invalide (1 à 100 par article).".into(),
        CheckoutError::ProductUnavailable(_) => "Un produit de votre panier n'est plus disponible.".into(),
        CheckoutError::InsufficientInventory { sku, available } => {
            format!("Stock insuffisant pour {sku} : {available} disponible(s).")
        }
        CheckoutError::PriceChanged { sku, current } => {
            format!("Le prix de {sku} a changé ({} $). Veuillez vérifier votre panier.", current.amount())
        }
        CheckoutError::UnknownProvince(p) => format!("Province inconnue : « {p} »."),
        CheckoutError::PromoNotFound(code) => format!("Le code promo {code} n'existe pas."),
        CheckoutError::Promo(e) => match e {
            PromoError::Inactive => "Ce code promo n'est pas actif.".into(),
            PromoError::NotStarted => "Ce code promo n'est pas encore valide.".into(),
            PromoError::Expired => "Ce code promo est expiré.".into(),
            PromoError::UsageLimitReached => "Ce code promo a atteint sa limite d'utilisation.".into(),
            PromoError::CustomerLimitReached => "Vous avez déjà utilisé ce code promo.".into(),
            PromoError::MinimumNotMet { minimum } => {
                format!("Un achat minimum de {} $ est requis pour ce code promo.", minimum.amount())
            }
        },
        CheckoutError::OrderNotFound => "Commande introuvable.".into(),
        CheckoutError::Gateway(_) => "Le service de paiement est indisponible. Veuillez réessayer.".into(),
        CheckoutError::Order(_) | CheckoutError::InvalidSignature | CheckoutError::InvalidPayload(_)
        | CheckoutError::OrderNumberTaken(_) | CheckoutError::Storage(_) => "Une erreur est survenue. Veuillez réessayer.".into(),
    }
}

fn english(error: &CheckoutError) -> String {
    match error {
        CheckoutError::Validation(detail) => format!("Some of the information provided is invalid: {detail}"),
        CheckoutError::EmptyCart => "Your cart is empty.".into(),
        CheckoutError::InvalidQuantity(_) => "Invalid quantity (1 to 100 per item).".into(),
        CheckoutError::ProductUnavailable(_) => "A product in your cart is no longer available.".into(),
        CheckoutError::InsufficientInventory { sku, available } => {
            format!("Not enough stock for {sku}: {available} available.")
        }
        CheckoutError::PriceChanged { sku, current } => {
            format!("The price of {sku} changed (${}). Please review your cart.", current.amount())
        }
        CheckoutError::UnknownProvince(p) => format!("Unknown province: \"{p}\"."),
        CheckoutError::PromoNotFound(code) => format!("Promo code {code} does not exist."),
        CheckoutError::Promo(e) => match e {
            PromoError::MinimumNotMet { minimum } => {
                format!("A minimum purchase of ${} is required for this promo code.", minimum.amount())
            }
            other => format!("This promo code cannot be used: {other}."),
        },
        CheckoutError::OrderNotFound => "Order not found.".into(),
        CheckoutError::Gateway(_) => "The payment service is unavailable. Please try again.".into(),
        CheckoutError::Order(_) | CheckoutError::InvalidSignature | CheckoutError::InvalidPayload(_)
        | CheckoutError::OrderNumberTaken(_) | CheckoutError::Storage(_) => "Something went wrong. Please try again.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;

    #[test]
    fn test_messages_follow_locale() {
        let e = CheckoutError::EmptyCart;
        assert_eq!(localized(&e, Locale::Fr), "Votre panier est vide.");
        assert_eq!(localized(&e, Locale::En), "Your cart is empty.");
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let e = CheckoutError::Storage("connection refused to 10.0.0.5".into());
        assert!(!localized(&e, Locale::En).contains("10.0.0.5"));
        let e = CheckoutError::Promo(PromoError::MinimumNotMet { minimum: Money::from_cents(5000) });
        assert!(localized(&e, Locale::Fr).contains("50.00"));
    }
}
