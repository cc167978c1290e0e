//! Built-in system documents: the last line of defence when no remote source answers.

use super::document::KnowledgeDocument;
use super::store::DocumentStore;
use crate::error::StoreResult;

pub const BUILTIN_PRICES_ID: &str = "sys-prices-v1";
pub const BUILTIN_POLICIES_ID: &str = "sys-policies-v1";

const PRICES_CSV: &str = "Producto,Categoría,Precio Unitario,Notas
Yerba Mate Playadito 1kg,Almacén,$3800,Oferta semanal
Yerba Mate Rosamonte 1kg,Almacén,$4100,
Azúcar Ledesma 1kg,Almacén,$1200,Max 2 por persona
Leche La Serenísima 1L,Lácteos,$1400,Cartón
Yogur Bebible Ser 1L,Lácteos,$1800,Sabor Frutilla/Vainilla
Queso Cremoso La Paulina,Lácteos,$8500,El kg
Pan Lactal Fargo Blanco,Panadería,$2200,Paquete grande
Fideos Matarazzo Tallarín 500g,Pastas,$1100,
Arroz Gallo Oro 1kg,Almacén,$1900,No se pasa
Aceite Natura 1.5L,Almacén,$2800,Girasol
Coca Cola 2.25L,Bebidas,$2600,Original/Zero
Cerveza Quilmes 1L,Bebidas,$2100,Retornable
Papel Higiénico Higienol 4u,Limpieza,$3200,80 metros
Jabón Líquido Ariel 3L,Limpieza,$9500,Para lavarropas
Shampoo Plusbelle 1L,Perfumería,$3100,Manzana
Carne Picada Especial,Carnicería,$6500,El kg
Asado de Tira,Carnicería,$8900,El kg - Novillo
Pechuga de Pollo,Carnicería,$5500,El kg
Manzana Roja,Verdulería,$1800,El kg
Banana Ecuador,Verdulería,$2200,El kg";

const POLICIES_TEXT: &str = "--- POLÍTICAS DE NOELIA SUPERMERCADO ---
1. HORARIOS DE ATENCIÓN:
   - Lunes a Sábados: 08:00 a 21:00 hs de corrido.
   - Domingos y Feriados: 09:00 a 13:30 hs.

2. MEDIOS DE PAGO:
   - Aceptamos Efectivo, Tarjetas de Débito y Crédito (Visa, Master, Cabal).
   - Mercado Pago con QR.
   - Cuenta DNI: Reintegro los días Sábados (tope según banco).

3. ENVÍOS A DOMICILIO:
   - Gratis para compras superiores a $30.000 dentro del radio de 20 cuadras.
   - Costo de envío general: $1500.
   - Los pedidos se toman por WhatsApp hasta las 18:00 hs para entrega en el día.

4. DEVOLUCIONES:
   - Se aceptan cambios dentro de las 72hs con ticket de compra y producto cerrado.
   - Productos de heladera no tienen cambio por corte de cadena de frío.";

/// The price list and store policies shipped with the binary.
pub fn builtin_documents() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::system(
            BUILTIN_PRICES_ID,
            "Lista de Precios Oficial (Sistema)",
            PRICES_CSV,
        ),
        KnowledgeDocument::system(
            BUILTIN_POLICIES_ID,
            "Horarios y Políticas (Sistema)",
            POLICIES_TEXT,
        ),
    ]
}

/// Seeds the system set at startup: the last-known-good cache if one exists, otherwise the
/// built-in documents. Returns `Ok(true)` when the built-ins were installed.
pub fn initialize_system_documents(store: &DocumentStore) -> StoreResult<bool> {
    let cached = store.cached_system_documents()?;
    if !cached.is_empty() {
        tracing::info!(
            target: "almacen::knowledge",
            documents = cached.len(),
            "System documents restored from last-known-good cache"
        );
        store.set_system_documents(cached);
        return Ok(false);
    }
    store.set_system_documents(builtin_documents());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::estimate_tokens;

    #[test]
    fn builtins_are_system_owned_with_consistent_estimates() {
        let docs = builtin_documents();
        assert_eq!(docs.len(), 2);
        for d in &docs {
            assert!(d.is_system_owned);
            assert_eq!(d.estimated_tokens, estimate_tokens(&d.content));
        }
        assert_eq!(docs[0].id, BUILTIN_PRICES_ID);
        assert_eq!(docs[0].content.lines().count(), 21);
    }

    #[test]
    fn initialize_prefers_cache_over_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open_path(dir.path()).unwrap();
        assert!(initialize_system_documents(&store).unwrap());
        assert_eq!(store.system_documents().len(), 2);

        store
            .replace_system_documents(vec![KnowledgeDocument::system("remote-1", "Remoto", "x")])
            .unwrap();
        let cached = store.cached_system_documents().unwrap();
        assert_eq!(cached.len(), 1);

        store.set_system_documents(Vec::new());
        assert!(!initialize_system_documents(&store).unwrap());
        assert_eq!(store.system_documents()[0].id, "remote-1");
    }
}
